use anyhow::Context;
use browser_steps::{Job, JobRunner, OutputDocument, Reporter, RunnerOptions, Variables};
use clap::Parser;
use std::io::Read;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Read the job document from this file instead of stdin
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Directory holding downloads/, profile/ and inference_summary/
    #[arg(short, long, default_value = ".")]
    work_dir: PathBuf,

    /// Chrome executable (defaults to the Playwright cache, then auto-detection)
    #[arg(long, env = "CHROME_PATH")]
    chrome_path: Option<PathBuf>,

    /// Run Chrome with a visible window
    #[arg(long)]
    headed: bool,
}

fn read_job(input: Option<&PathBuf>) -> anyhow::Result<String> {
    match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read job from {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read job from stdin")?;
            Ok(text)
        }
    }
}

fn init_logging(verbose: u64) {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(log::LevelFilter::Info)
        .target(env_logger::Target::Stdout);
    if verbose >= 1 {
        builder.filter_module("browser_steps", log::LevelFilter::Debug);
    }
    builder.parse_default_env().init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let text = read_job(args.input.as_ref())?;
    init_logging(Job::peek_verbose(&text));

    let job = match Job::parse(&text) {
        Ok(job) => job,
        Err(e) => {
            log::error!("🛑 {}", e);
            // No result line unless the document itself was readable and asked for one
            if Job::peek_xy(&text) {
                Reporter::stdout(true).failure(&e.to_string(), &OutputDocument::default())?;
            }
            std::process::exit(1);
        }
    };

    let reporter = Reporter::stdout(job.xy);
    let options = RunnerOptions {
        work_dir: args.work_dir,
        chrome_path: args.chrome_path,
        headless: !args.headed,
    };

    let code = JobRunner::new(job, options)
        .run(Variables::from_env(), reporter)
        .await;
    std::process::exit(code);
}

//! Machine-readable progress and result lines for the job host.
//!
//! Only written when the job opted in with `xy`. Each line is one JSON
//! object; human-readable logging goes through `log` instead.

use crate::output::OutputDocument;
use serde::Serialize;
use std::io::{self, Write};

const RESULT_FILES: [&str; 1] = ["downloads/*"];

#[derive(Serialize)]
struct ProgressLine {
    xy: u8,
    progress: f64,
}

#[derive(Serialize)]
struct ResultLine<'a> {
    xy: u8,
    code: i32,
    description: &'a str,
    data: &'a OutputDocument,
    files: [&'static str; 1],
}

pub struct Reporter {
    enabled: bool,
    out: Box<dyn Write + Send>,
}

impl Reporter {
    pub fn new(enabled: bool, out: Box<dyn Write + Send>) -> Self {
        Self { enabled, out }
    }

    pub fn stdout(enabled: bool) -> Self {
        Self::new(enabled, Box::new(io::stdout()))
    }

    /// A reporter that never writes anything.
    pub fn disabled() -> Self {
        Self::new(false, Box::new(io::sink()))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Report `completed` of `total` steps done (1-based count of finished steps).
    pub fn progress(&mut self, completed: usize, total: usize) -> io::Result<()> {
        if total == 0 {
            return Ok(());
        }
        self.write_line(&ProgressLine {
            xy: 1,
            progress: completed as f64 / total as f64,
        })
    }

    pub fn success(&mut self, data: &OutputDocument) -> io::Result<()> {
        self.write_line(&ResultLine {
            xy: 1,
            code: 0,
            description: "Success",
            data,
            files: RESULT_FILES,
        })
    }

    pub fn failure(&mut self, description: &str, data: &OutputDocument) -> io::Result<()> {
        self.write_line(&ResultLine {
            xy: 1,
            code: 1,
            description,
            data,
            files: RESULT_FILES,
        })
    }

    fn write_line<T: Serialize>(&mut self, line: &T) -> io::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let json = serde_json::to_string(line)?;
        writeln!(self.out, "{}", json)?;
        self.out.flush()
    }
}

pub mod ai;
pub mod browser;
pub mod capture;
pub mod error;
pub mod interpolate;
pub mod lenient;
pub mod output;
pub mod report;
pub mod runner;
pub mod script;
pub mod selector;
pub mod settings;

//  Re-export commonly used items
pub use ai::{ActOptions, ActOutcome, AiExecutor, ChatCompletionsExecutor};
pub use browser::{ChromeDriver, ChromePage, ClickOptions, NavigationOptions, PageDriver};
pub use capture::{Capture, CaptureRouter, CaptureRule};
pub use error::{Result, StepError};
pub use interpolate::Variables;
pub use output::OutputDocument;
pub use report::Reporter;
pub use runner::{JobRunner, RunnerOptions};
pub use script::{compile, RunContext, Step, StepExecutor};
pub use selector::{ElementState, Locator, Target};
pub use settings::{Job, Settings, VideoMode};

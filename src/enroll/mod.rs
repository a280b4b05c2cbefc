pub mod flow;
pub mod terminal;

pub use flow::{enroll, CapturePrompt, EnrollEvent, EnrollOptions, EnrollOutcome, PromptAction};
pub use terminal::TerminalPrompt;

//! Execution modes
//!
//! One binary, three long-running modes:
//! - `serve`: authenticated management API
//! - `redirect`: public redirector publishing click events
//! - `ingest`: click-stream consumer

mod ingestor;
mod redirector;
mod server;

pub use ingestor::run_ingestor;
pub use redirector::run_redirector;
pub use server::run_server;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Serve,
    Redirect,
    Ingest,
    Unknown,
}

/// 根据第一个参数选择模式；无参数默认 serve
pub fn detect_mode(args: &[String]) -> Mode {
    match args.get(1).map(|s| s.as_str()) {
        None | Some("serve") => Mode::Serve,
        Some("redirect") => Mode::Redirect,
        Some("ingest") => Mode::Ingest,
        Some(_) => Mode::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_mode_detection() {
        assert_eq!(detect_mode(&args(&["linkhop"])), Mode::Serve);
        assert_eq!(detect_mode(&args(&["linkhop", "serve"])), Mode::Serve);
        assert_eq!(detect_mode(&args(&["linkhop", "redirect"])), Mode::Redirect);
        assert_eq!(detect_mode(&args(&["linkhop", "ingest"])), Mode::Ingest);
        assert_eq!(detect_mode(&args(&["linkhop", "bogus"])), Mode::Unknown);
    }
}

//! Library half of the `dw` command: settings, logging and event output

pub mod logging;
pub mod output;
pub mod settings;

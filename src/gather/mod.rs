pub mod detectors;
pub mod extract;
pub mod js_analysis;

pub use detectors::{challenge_signal, detect_challenge, detect_red_flags, red_flag_signal, RedFlags};
pub use extract::{extract_page, script_endpoints, Form, PageExtract};
pub use js_analysis::{analyze_script, script_signals, ScriptReport};

pub mod api_patterns;
pub mod params;

pub use api_patterns::is_api_candidate;
pub use params::{classify_param, param_signals, ParamClass};

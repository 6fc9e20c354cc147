// Version and build tracking for the course advisor

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const BUILD: &str = "0007";

pub fn version_string() -> String {
    format!("v{}-{}", VERSION, BUILD)
}

pub fn full_version_info() -> String {
    format!("Course Advisor {} (Build {})", VERSION, BUILD)
}

/// Default User-Agent for community search requests
pub fn user_agent() -> String {
    format!("Purdue-Course-Advisor/v{}", VERSION)
}

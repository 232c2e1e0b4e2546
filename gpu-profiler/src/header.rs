//! Result file header and base columns

use crate::config::{ProfilerConfig, DEFAULT_MAX_KERNELS};
use std::path::PathBuf;

/// Columns every row carries, before the enabled counters
pub const BASE_COLUMNS: [&str; 8] = [
    "Method",
    "ExecutionOrder",
    "ThreadID",
    "GlobalWorkSize",
    "WorkGroupSize",
    "LocalMemSize",
    "VGPRs",
    "SGPRs",
];

const MAJOR_VERSION: &str = env!("CARGO_PKG_VERSION_MAJOR");
const MINOR_VERSION: &str = env!("CARGO_PKG_VERSION_MINOR");
const PATCH_VERSION: &str = env!("CARGO_PKG_VERSION_PATCH");

/// `Key=Value` header lines describing this profiling run
pub fn header_lines(config: &ProfilerConfig, application: &str) -> Vec<String> {
    let mut lines = vec![
        format!("ProfileFileVersion={}.{}", MAJOR_VERSION, MINOR_VERSION),
        format!(
            "ProfilerVersion={}.{}.{}",
            MAJOR_VERSION, MINOR_VERSION, PATCH_VERSION
        ),
        "API=HSA".to_string(),
        format!("Application={}", application),
        format!("ApplicationArgs={}", config.app_args),
        format!(
            "WorkingDirectory={}",
            config
                .working_dir
                .as_ref()
                .map(|d| d.display().to_string())
                .unwrap_or_default()
        ),
    ];

    if !config.env_vars.is_empty() {
        lines.push(format!(
            "FullEnvironment={}",
            u8::from(config.full_environment)
        ));
        lines.extend(
            config
                .env_vars
                .iter()
                .map(|(key, value)| format!("EnvVar={}={}", key, value)),
        );
    }

    lines.push(format!("OS Version={}", os_version()));
    lines.push(format!("DisplayName={}", config.session_name));
    lines.push(format!("ListSeparator={}", config.list_separator));

    if config.max_kernels != DEFAULT_MAX_KERNELS {
        lines.push(format!("MaxNumberOfKernelsToProfile={}", config.max_kernels));
    }

    lines
}

pub fn base_columns() -> Vec<String> {
    BASE_COLUMNS.iter().map(|c| c.to_string()).collect()
}

/// Operating system description for the header
pub fn os_version() -> String {
    match std::fs::read_to_string("/proc/sys/kernel/osrelease") {
        Ok(release) => format!("{} {}", capitalize(std::env::consts::OS), release.trim()),
        Err(_) => capitalize(std::env::consts::OS),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Full path of the running executable
pub fn application_path() -> PathBuf {
    std::env::current_exe().unwrap_or_default()
}

/// Executable file name without extension
pub fn exe_name() -> String {
    application_path()
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "app".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_header() {
        let config = ProfilerConfig {
            session_name: "nightly".to_string(),
            ..Default::default()
        };
        let lines = header_lines(&config, "/opt/app/bin/matmul");

        assert!(lines[0].starts_with("ProfileFileVersion="));
        assert!(lines[1].starts_with("ProfilerVersion="));
        assert_eq!(lines[2], "API=HSA");
        assert_eq!(lines[3], "Application=/opt/app/bin/matmul");
        assert!(lines.contains(&"DisplayName=nightly".to_string()));
        assert!(lines.contains(&"ListSeparator=,".to_string()));
        assert!(!lines.iter().any(|l| l.starts_with("FullEnvironment")));
        assert!(!lines.iter().any(|l| l.starts_with("MaxNumberOfKernelsToProfile")));
    }

    #[test]
    fn test_env_vars_and_kernel_limit() {
        let mut config = ProfilerConfig {
            max_kernels: 50,
            full_environment: true,
            ..Default::default()
        };
        config.env_vars.insert("A".to_string(), "1".to_string());
        config.env_vars.insert("B".to_string(), "2".to_string());

        let lines = header_lines(&config, "app");
        let env_start = lines.iter().position(|l| l == "FullEnvironment=1").unwrap();
        assert_eq!(lines[env_start + 1], "EnvVar=A=1");
        assert_eq!(lines[env_start + 2], "EnvVar=B=2");
        assert_eq!(lines.last().unwrap(), "MaxNumberOfKernelsToProfile=50");
    }

    #[test]
    fn test_base_columns() {
        let columns = base_columns();
        assert_eq!(columns.first().map(String::as_str), Some("Method"));
        assert_eq!(columns.last().map(String::as_str), Some("SGPRs"));
    }
}

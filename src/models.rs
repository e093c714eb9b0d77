//! Data models for Seafile web API responses.

use serde::{Deserialize, Serialize};

/// Metadata for one remote library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub permission: String,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub mtime: i64,
    #[serde(default)]
    pub size: u64,
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub root: String,
}

impl std::fmt::Display for LibraryInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}",
            self.id,
            format_size(self.size),
            self.owner,
            self.name
        )
    }
}

/// One entry in a library directory listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(default)]
    pub id: String,
    pub name: String,
    /// Entry kind as reported by the server: `"file"` or `"dir"`.
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub mtime: i64,
}

impl std::fmt::Display for FileEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let size = if self.kind == "dir" {
            "-".to_string()
        } else {
            format_size(self.size)
        };
        write!(f, "{:<6} {:>10} {}", self.kind, size, self.name)
    }
}

/// Token issued by `POST /auth-token/`.
#[derive(Debug, Deserialize)]
pub struct AuthTokenResponse {
    #[serde(rename = "token", alias = "Token")]
    pub token: String,
}

/// Reply from the library owner endpoint.
#[derive(Debug, Deserialize)]
pub struct OwnerResponse {
    #[serde(rename = "owner", alias = "Owner")]
    pub owner: String,
}

/// Format bytes into human-readable size.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format seconds into human-readable time (e.g., "2m 15s", "1h 5m", "< 1s").
pub fn format_eta(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "--".to_string();
    }

    let secs = seconds.round() as u64;

    if secs == 0 {
        return "< 1s".to_string();
    }

    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let remaining_secs = secs % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, remaining_secs)
    } else {
        format!("{}s", remaining_secs)
    }
}

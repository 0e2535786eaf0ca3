//! `main.conf`: the flat `key=value` configuration file (spec §6A).
//!
//! Hand-rolled rather than `toml`/`serde`-driven: the format itself is a
//! direct port of the original application's own `key=value\n` convention
//! (confirmed in `original_source/src/util.h`), carrying no nesting that
//! would benefit from a structured deserializer. Unknown keys are ignored;
//! missing keys fall back to the defaults below.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub name: String,
    pub address: String,
    pub user: String,
    /// Hex-encoded ciphertext of the password, obfuscated under `user`
    /// (spec §6's password-persistence scheme). Empty if unset.
    pub pass: String,
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub save_pass: bool,
    pub inbox: String,
    pub trash: String,
    pub drafts: String,
    pub sent: String,
    pub cache_encrypt: bool,
    pub prefetch_level: u8,
    pub html_convert_cmd: String,
    pub ext_viewer_cmd: String,
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: String::new(),
            address: String::new(),
            user: String::new(),
            pass: String::new(),
            imap_host: String::new(),
            imap_port: 993,
            smtp_host: String::new(),
            smtp_port: 465,
            save_pass: false,
            inbox: "INBOX".to_string(),
            trash: String::new(),
            drafts: String::new(),
            sent: String::new(),
            cache_encrypt: true,
            prefetch_level: 2,
            html_convert_cmd: detect_html_convert_cmd(),
            ext_viewer_cmd: default_ext_viewer_cmd(),
            verbose_logging: false,
        }
    }
}

impl Config {
    /// Parses `key=value` pairs over the defaults. Blank lines and lines
    /// starting with `#` are ignored, matching the original format.
    pub fn parse(text: &str) -> Self {
        let mut config = Self::default();
        let kv = parse_lines(text);

        if let Some(v) = kv.get("name") {
            config.name = v.clone();
        }
        if let Some(v) = kv.get("address") {
            config.address = v.clone();
        }
        if let Some(v) = kv.get("user") {
            config.user = v.clone();
        }
        if let Some(v) = kv.get("pass") {
            config.pass = v.clone();
        }
        if let Some(v) = kv.get("imap_host") {
            config.imap_host = v.clone();
        }
        if let Some(v) = kv.get("imap_port").and_then(|v| v.parse().ok()) {
            config.imap_port = v;
        }
        if let Some(v) = kv.get("smtp_host") {
            config.smtp_host = v.clone();
        }
        if let Some(v) = kv.get("smtp_port").and_then(|v| v.parse().ok()) {
            config.smtp_port = v;
        }
        if let Some(v) = kv.get("save_pass") {
            config.save_pass = parse_bool01(v);
        }
        if let Some(v) = kv.get("inbox") {
            config.inbox = v.clone();
        }
        if let Some(v) = kv.get("trash") {
            config.trash = v.clone();
        }
        if let Some(v) = kv.get("drafts") {
            config.drafts = v.clone();
        }
        if let Some(v) = kv.get("sent") {
            config.sent = v.clone();
        }
        if let Some(v) = kv.get("cache_encrypt") {
            config.cache_encrypt = parse_bool01(v);
        }
        if let Some(v) = kv.get("prefetch_level").and_then(|v| v.parse().ok()) {
            config.prefetch_level = v;
        }
        if let Some(v) = kv.get("html_convert_cmd") {
            config.html_convert_cmd = v.clone();
        }
        if let Some(v) = kv.get("ext_viewer_cmd") {
            config.ext_viewer_cmd = v.clone();
        }
        if let Some(v) = kv.get("verbose_logging") {
            config.verbose_logging = parse_bool01(v);
        }

        config
    }

    /// Loads `main.conf` from `path`. A missing file yields the defaults
    /// rather than an error — only a field that is *present but invalid*
    /// is a startup failure, and validation of that happens in
    /// [`crate::context::AppContext`].
    pub fn load(path: &Path) -> std::io::Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_key_value_string())
    }

    pub fn to_key_value_string(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("name={}\n", self.name));
        out.push_str(&format!("address={}\n", self.address));
        out.push_str(&format!("user={}\n", self.user));
        out.push_str(&format!("pass={}\n", self.pass));
        out.push_str(&format!("imap_host={}\n", self.imap_host));
        out.push_str(&format!("imap_port={}\n", self.imap_port));
        out.push_str(&format!("smtp_host={}\n", self.smtp_host));
        out.push_str(&format!("smtp_port={}\n", self.smtp_port));
        out.push_str(&format!("save_pass={}\n", self.save_pass as u8));
        out.push_str(&format!("inbox={}\n", self.inbox));
        out.push_str(&format!("trash={}\n", self.trash));
        out.push_str(&format!("drafts={}\n", self.drafts));
        out.push_str(&format!("sent={}\n", self.sent));
        out.push_str(&format!("cache_encrypt={}\n", self.cache_encrypt as u8));
        out.push_str(&format!("prefetch_level={}\n", self.prefetch_level));
        out.push_str(&format!("html_convert_cmd={}\n", self.html_convert_cmd));
        out.push_str(&format!("ext_viewer_cmd={}\n", self.ext_viewer_cmd));
        out.push_str(&format!("verbose_logging={}\n", self.verbose_logging as u8));
        out
    }

    /// A pre-filled config for `--setup gmail`.
    pub fn preset_gmail(address: String) -> Self {
        Self {
            imap_host: "imap.gmail.com".to_string(),
            smtp_host: "smtp.gmail.com".to_string(),
            user: address.clone(),
            address,
            ..Self::default()
        }
    }

    /// A pre-filled config for `--setup outlook`.
    pub fn preset_outlook(address: String) -> Self {
        Self {
            imap_host: "outlook.office365.com".to_string(),
            smtp_host: "smtp.office365.com".to_string(),
            user: address.clone(),
            address,
            ..Self::default()
        }
    }
}

fn parse_lines(text: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            out.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    out
}

fn parse_bool01(value: &str) -> bool {
    value.trim() == "1"
}

fn command_exists(bin: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(bin).is_file()))
        .unwrap_or(false)
}

fn detect_html_convert_cmd() -> String {
    for bin in ["lynx", "elinks", "links"] {
        if command_exists(bin) {
            return format!("{bin} -dump");
        }
    }
    String::new()
}

#[cfg(not(target_os = "macos"))]
fn default_ext_viewer_cmd() -> String {
    "xdg-open".to_string()
}

#[cfg(target_os = "macos")]
fn default_ext_viewer_cmd() -> String {
    "open".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = Config::default();
        assert_eq!(config.imap_port, 993);
        assert_eq!(config.smtp_port, 465);
        assert_eq!(config.inbox, "INBOX");
        assert!(config.cache_encrypt);
        assert_eq!(config.prefetch_level, 2);
        assert!(!config.save_pass);
        assert!(!config.verbose_logging);
    }

    #[test]
    fn parses_recognized_keys_and_ignores_unknown() {
        let text = "\
name=Alice
address=alice@example.com
imap_host=imap.example.com
imap_port=1993
save_pass=1
prefetch_level=3
mystery_key=ignored me
# a comment
";
        let config = Config::parse(text);
        assert_eq!(config.name, "Alice");
        assert_eq!(config.address, "alice@example.com");
        assert_eq!(config.imap_host, "imap.example.com");
        assert_eq!(config.imap_port, 1993);
        assert!(config.save_pass);
        assert_eq!(config.prefetch_level, 3);
        // unrecognized keys are silently ignored, not an error
        assert_eq!(config.smtp_port, 465);
    }

    #[test]
    fn save_pass_zero_is_false() {
        let config = Config::parse("save_pass=0\n");
        assert!(!config.save_pass);
    }

    #[test]
    fn round_trips_through_key_value_string() {
        let mut config = Config::default();
        config.name = "Bob".to_string();
        config.address = "bob@example.com".to_string();
        config.save_pass = true;
        config.prefetch_level = 1;

        let text = config.to_key_value_string();
        let reparsed = Config::parse(&text);
        assert_eq!(reparsed, config);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("main.conf")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_then_save_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.conf");
        let mut config = Config::default();
        config.user = "carol".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn gmail_preset_fills_hosts() {
        let config = Config::preset_gmail("me@gmail.com".to_string());
        assert_eq!(config.imap_host, "imap.gmail.com");
        assert_eq!(config.smtp_host, "smtp.gmail.com");
        assert_eq!(config.address, "me@gmail.com");
    }
}

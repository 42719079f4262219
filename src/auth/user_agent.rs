//! Best-effort `User-Agent` parsing for session bookkeeping.
//!
//! Only the handful of fields shown in session lists and used for the
//! new-device check are extracted. Unknown agents yield `None` fields, never
//! an error.

use lazy_static::lazy_static;
use regex::Regex;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedUserAgent {
    pub raw: String,
    pub browser_name: Option<String>,
    pub browser_version: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub device_type: Option<String>,
    pub device_vendor: Option<String>,
    pub device_model: Option<String>,
}

/// Fields compared when deciding whether a login comes from a known device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFingerprint {
    pub browser_name: Option<String>,
    pub os_name: Option<String>,
    pub device_type: Option<String>,
}

lazy_static! {
    // Order matters: Edge and Opera also advertise Chrome, Chrome advertises Safari.
    static ref BROWSERS: Vec<(&'static str, Regex)> = vec![
        ("Edge", Regex::new(r"Edg(?:e|A|iOS)?/([\d.]+)").unwrap()),
        ("Opera", Regex::new(r"(?:OPR|Opera)/([\d.]+)").unwrap()),
        ("Samsung Internet", Regex::new(r"SamsungBrowser/([\d.]+)").unwrap()),
        ("Chrome", Regex::new(r"(?:Chrome|CriOS)/([\d.]+)").unwrap()),
        ("Firefox", Regex::new(r"(?:Firefox|FxiOS)/([\d.]+)").unwrap()),
        ("Safari", Regex::new(r"Version/([\d.]+).*Safari/").unwrap()),
        ("curl", Regex::new(r"^curl/([\d.]+)").unwrap()),
    ];
    static ref WINDOWS: Regex = Regex::new(r"Windows NT ([\d.]+)").unwrap();
    static ref ANDROID: Regex = Regex::new(r"Android ([\d.]+)(?:; ([^;)]+?))?(?: Build/[^;)]*)?[;)]").unwrap();
    static ref IOS: Regex = Regex::new(r"(?:iPhone|CPU) OS ([\d_]+)").unwrap();
    static ref MACOS: Regex = Regex::new(r"Mac OS X ([\d_.]+)").unwrap();
    static ref CROS: Regex = Regex::new(r"CrOS \S+ ([\d.]+)").unwrap();
}

fn windows_release(nt: &str) -> &str {
    match nt {
        "10.0" => "10",
        "6.3" => "8.1",
        "6.2" => "8",
        "6.1" => "7",
        other => other,
    }
}

impl ParsedUserAgent {
    pub fn parse(raw: &str) -> Self {
        let mut ua = ParsedUserAgent {
            raw: raw.to_string(),
            ..Default::default()
        };

        if let Some((name, caps)) = BROWSERS
            .iter()
            .find_map(|(name, re)| re.captures(raw).map(|c| (*name, c)))
        {
            ua.browser_name = Some(name.to_string());
            ua.browser_version = caps.get(1).map(|m| m.as_str().to_string());
        }

        if let Some(c) = WINDOWS.captures(raw) {
            ua.os_name = Some("Windows".into());
            ua.os_version = Some(windows_release(&c[1]).to_string());
            ua.device_type = Some("desktop".into());
        } else if let Some(c) = ANDROID.captures(raw) {
            ua.os_name = Some("Android".into());
            ua.os_version = Some(c[1].to_string());
            ua.device_model = c
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .filter(|m| !m.is_empty() && m != "K" && !m.starts_with("wv"));
            let kind = if raw.contains("Mobile") { "mobile" } else { "tablet" };
            ua.device_type = Some(kind.into());
        } else if raw.contains("iPhone") || raw.contains("iPad") || raw.contains("iPod") {
            let model = if raw.contains("iPad") {
                "iPad"
            } else if raw.contains("iPod") {
                "iPod"
            } else {
                "iPhone"
            };
            ua.os_name = Some("iOS".into());
            ua.os_version = IOS.captures(raw).map(|c| c[1].replace('_', "."));
            ua.device_vendor = Some("Apple".into());
            ua.device_model = Some(model.into());
            ua.device_type = Some(if model == "iPad" { "tablet" } else { "mobile" }.into());
        } else if let Some(c) = MACOS.captures(raw) {
            ua.os_name = Some("macOS".into());
            ua.os_version = Some(c[1].replace('_', "."));
            ua.device_vendor = Some("Apple".into());
            ua.device_type = Some("desktop".into());
        } else if let Some(c) = CROS.captures(raw) {
            ua.os_name = Some("Chrome OS".into());
            ua.os_version = Some(c[1].to_string());
            ua.device_type = Some("desktop".into());
        } else if raw.contains("Linux") {
            ua.os_name = Some("Linux".into());
            ua.device_type = Some("desktop".into());
        }

        ua
    }

    pub fn fingerprint(&self) -> DeviceFingerprint {
        DeviceFingerprint {
            browser_name: self.browser_name.clone(),
            os_name: self.os_name.clone(),
            device_type: self.device_type.clone(),
        }
    }

    /// Human-readable summary, e.g. `iPhone, iOS 17.1, Safari 17.1`.
    pub fn describe(&self) -> String {
        fn join(name: &Option<String>, version: &Option<String>) -> String {
            match (name, version) {
                (Some(n), Some(v)) => format!("{n} {v}"),
                (Some(n), None) => n.clone(),
                _ => "unknown".into(),
            }
        }
        format!(
            "{}, {}, {}",
            self.device_model.as_deref().unwrap_or("Unknown device"),
            join(&self.os_name, &self.os_version),
            join(&self.browser_name, &self.browser_version),
        )
    }
}

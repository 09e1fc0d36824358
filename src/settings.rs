//! Typed kiosk configuration and its normalizer.
//!
//! Every value handed out by a backend passes through [`normalize`], so a
//! `Settings` can never carry an absent, out-of-range or mistyped field no
//! matter what was stored or imported.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Supervisor ids that are always allowed, whatever the stored list says.
pub const MASTER_SUPERVISOR_IDS: [&str; 2] = ["0000000000", "9999999999"];

pub const THEMES: &[&str] = &["classic", "dark", "ocean", "forest", "sunset", "contrast"];
pub const SCALE_MODES: &[&str] = &["auto", "manual"];
pub const ROTATIONS: &[i64] = &[0, 90, -90];
pub const REMOTE_SYNC_MODES: &[&str] = &["time", "countdown"];
pub const LANGUAGES: &[&str] = &["en", "ar", "fr"];
pub const AD_POSITIONS: &[&str] = &["top", "bottom", "side"];
pub const CLOCK_FORMATS: &[&str] = &["24h", "12h"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreensaverSlide {
    pub src: String,
    pub caption: String,
    pub duration_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdSlot {
    pub id: String,
    pub src: String,
    pub link: String,
    pub position: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    // identity
    pub school_name: String,
    pub kiosk_name: String,
    pub language: String,

    // schedule
    pub school_start: String,
    pub grace_minutes: i64,
    pub check_in_open: String,
    pub check_in_close: String,
    pub check_out_enabled: bool,
    pub check_out_time: String,
    pub duplicate_scan_seconds: i64,
    pub absence_cutoff: String,
    pub very_late_minutes: i64,
    pub weekend_days: Vec<String>,

    // theme and layout
    pub theme: String,
    pub accent_color: String,
    pub font_scale: i64,
    pub card_scale: i64,
    pub photo_scale: i64,
    pub scale_mode: String,
    pub rotation: i64,
    pub clock_format: String,
    pub show_clock: bool,
    pub show_date: bool,
    pub show_photo: bool,
    pub show_grade: bool,
    pub show_class: bool,
    pub card_display_seconds: i64,
    pub show_late_minutes: bool,
    pub offline_banner_enabled: bool,

    // messages
    pub welcome_message: String,
    pub late_message: String,
    pub unknown_message: String,
    pub duplicate_message: String,
    pub absent_message: String,
    pub permission_message: String,

    // audio
    pub sound_enabled: bool,
    pub audio_volume: i64,
    pub success_sound: String,
    pub late_sound: String,
    pub error_sound: String,
    pub permission_sound: String,

    // screensaver
    pub screensaver_enabled: bool,
    pub idle_minutes: i64,
    pub slide_seconds: i64,
    pub screensaver_slides: Vec<ScreensaverSlide>,

    // ads
    pub ads_enabled: bool,
    pub ad_rotation_seconds: i64,
    pub ad_slots: Vec<AdSlot>,

    // remote sync
    pub remote_sync_enabled: bool,
    pub remote_sync_mode: String,
    pub remote_sync_time: String,
    pub remote_sync_interval_minutes: i64,
    pub remote_sync_url: String,
    pub remote_sync_token: String,

    // access
    pub supervisor_ids: Vec<String>,
    pub permission_approver_ids: Vec<String>,
    pub kiosk_pin: String,
    pub auto_focus_input: bool,
    pub scan_input_delay_ms: i64,
    pub history_days: i64,
}

impl Default for Settings {
    fn default() -> Self {
        normalize(&Value::Null)
    }
}

impl Settings {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// Overlay `patch` on top of this record and normalize the result.
    pub fn merged(&self, patch: &Value) -> Settings {
        let mut base = self.to_value();
        if let (Some(obj), Some(patch_obj)) = (base.as_object_mut(), patch.as_object()) {
            for (k, v) in patch_obj {
                obj.insert(k.clone(), v.clone());
            }
        }
        normalize(&base)
    }
}

/// Turn an arbitrary, possibly partial object into a complete `Settings`.
pub fn normalize(raw: &Value) -> Settings {
    let empty = Map::new();
    let o = raw.as_object().unwrap_or(&empty);

    Settings {
        school_name: string_field(o, "schoolName", ""),
        kiosk_name: string_field(o, "kioskName", "Kiosk"),
        language: enum_field(o, "language", LANGUAGES, "en"),

        school_start: clock_field(o, "schoolStart", "07:30"),
        grace_minutes: int_field(o, "graceMinutes", 10, 0, 120),
        check_in_open: clock_field(o, "checkInOpen", "06:00"),
        check_in_close: clock_field(o, "checkInClose", "10:00"),
        check_out_enabled: bool_field(o, "checkOutEnabled", false),
        check_out_time: clock_field(o, "checkOutTime", "14:00"),
        duplicate_scan_seconds: int_field(o, "duplicateScanSeconds", 30, 0, 600),
        absence_cutoff: clock_field(o, "absenceCutoff", "09:00"),
        very_late_minutes: int_field(o, "veryLateMinutes", 30, 0, 240),
        weekend_days: weekday_list_field(o, "weekendDays", &["fri", "sat"]),

        theme: enum_field(o, "theme", THEMES, "classic"),
        accent_color: color_field(o, "accentColor", "#1e88e5"),
        font_scale: int_field(o, "fontScale", 100, 60, 180),
        card_scale: int_field(o, "cardScale", 100, 60, 180),
        photo_scale: int_field(o, "photoScale", 100, 60, 180),
        scale_mode: enum_field(o, "scaleMode", SCALE_MODES, "auto"),
        rotation: rotation_field(o, "rotation"),
        clock_format: enum_field(o, "clockFormat", CLOCK_FORMATS, "24h"),
        show_clock: bool_field(o, "showClock", true),
        show_date: bool_field(o, "showDate", true),
        show_photo: bool_field(o, "showPhoto", false),
        show_grade: bool_field(o, "showGrade", true),
        show_class: bool_field(o, "showClass", true),
        card_display_seconds: int_field(o, "cardDisplaySeconds", 4, 1, 60),
        show_late_minutes: bool_field(o, "showLateMinutes", true),
        offline_banner_enabled: bool_field(o, "offlineBannerEnabled", true),

        welcome_message: string_field(o, "welcomeMessage", "Welcome"),
        late_message: string_field(o, "lateMessage", "You are late"),
        unknown_message: string_field(o, "unknownMessage", "Card not recognized"),
        duplicate_message: string_field(o, "duplicateMessage", "Already checked in"),
        absent_message: string_field(o, "absentMessage", "Marked absent"),
        permission_message: string_field(o, "permissionMessage", "Permission recorded"),

        sound_enabled: bool_field(o, "soundEnabled", true),
        audio_volume: int_field(o, "audioVolume", 80, 0, 100),
        success_sound: string_field(o, "successSound", "success"),
        late_sound: string_field(o, "lateSound", "late"),
        error_sound: string_field(o, "errorSound", "error"),
        permission_sound: string_field(o, "permissionSound", "permission"),

        screensaver_enabled: bool_field(o, "screensaverEnabled", true),
        idle_minutes: int_field(o, "idleMinutes", 5, 0, 120),
        slide_seconds: int_field(o, "slideSeconds", 10, 3, 120),
        screensaver_slides: slides_field(o, "screensaverSlides"),

        ads_enabled: bool_field(o, "adsEnabled", false),
        ad_rotation_seconds: int_field(o, "adRotationSeconds", 15, 5, 600),
        ad_slots: ad_slots_field(o, "adSlots"),

        remote_sync_enabled: bool_field(o, "remoteSyncEnabled", false),
        remote_sync_mode: enum_field(o, "remoteSyncMode", REMOTE_SYNC_MODES, "countdown"),
        remote_sync_time: clock_field(o, "remoteSyncTime", "18:00"),
        remote_sync_interval_minutes: int_field(o, "remoteSyncIntervalMinutes", 60, 5, 1440),
        remote_sync_url: string_field(o, "remoteSyncUrl", ""),
        remote_sync_token: string_field(o, "remoteSyncToken", ""),

        supervisor_ids: id_list_field(o, "supervisorIds"),
        permission_approver_ids: id_list_field(o, "permissionApproverIds"),
        kiosk_pin: pin_field(o, "kioskPin"),
        auto_focus_input: bool_field(o, "autoFocusInput", true),
        scan_input_delay_ms: int_field(o, "scanInputDelayMs", 150, 0, 2000),
        history_days: int_field(o, "historyDays", 30, 1, 365),
    }
}

fn number_of(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

fn int_field(o: &Map<String, Value>, key: &str, default: i64, min: i64, max: i64) -> i64 {
    match o.get(key).and_then(number_of) {
        Some(n) => (n.round() as i64).clamp(min, max),
        None => default,
    }
}

fn bool_field(o: &Map<String, Value>, key: &str, default: bool) -> bool {
    match o.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => match n.as_i64() {
            Some(0) => false,
            Some(1) => true,
            _ => default,
        },
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => default,
        },
        _ => default,
    }
}

fn string_field(o: &Map<String, Value>, key: &str, default: &str) -> String {
    match o.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Null) | None => default.to_string(),
        Some(_) => default.to_string(),
    }
}

fn enum_field(o: &Map<String, Value>, key: &str, allowed: &[&str], default: &str) -> String {
    let Some(s) = o.get(key).and_then(|v| v.as_str()) else {
        return default.to_string();
    };
    let s = s.trim();
    allowed
        .iter()
        .find(|a| a.eq_ignore_ascii_case(s))
        .map(|a| a.to_string())
        .unwrap_or_else(|| default.to_string())
}

fn rotation_field(o: &Map<String, Value>, key: &str) -> i64 {
    match o.get(key).and_then(number_of) {
        Some(n) if n.fract() == 0.0 && ROTATIONS.contains(&(n as i64)) => n as i64,
        _ => 0,
    }
}

/// `H:MM` or `HH:MM` (seconds tolerated and dropped) to zero-padded `HH:MM`.
pub fn parse_clock(s: &str) -> Option<String> {
    let mut parts = s.trim().split(':');
    let h: u32 = parts.next()?.trim().parse().ok()?;
    let m: u32 = parts.next()?.trim().parse().ok()?;
    if let Some(sec) = parts.next() {
        let sec: u32 = sec.trim().parse().ok()?;
        if sec > 59 {
            return None;
        }
    }
    if parts.next().is_some() || h > 23 || m > 59 {
        return None;
    }
    Some(format!("{:02}:{:02}", h, m))
}

fn clock_field(o: &Map<String, Value>, key: &str, default: &str) -> String {
    o.get(key)
        .and_then(|v| v.as_str())
        .and_then(parse_clock)
        .unwrap_or_else(|| default.to_string())
}

fn color_field(o: &Map<String, Value>, key: &str, default: &str) -> String {
    let Some(s) = o.get(key).and_then(|v| v.as_str()) else {
        return default.to_string();
    };
    let s = s.trim().to_ascii_lowercase();
    let hex = s.strip_prefix('#').unwrap_or("");
    if (hex.len() == 3 || hex.len() == 6) && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        s
    } else {
        default.to_string()
    }
}

fn pin_field(o: &Map<String, Value>, key: &str) -> String {
    let s = string_field(o, key, "");
    if s.len() <= 12 && s.chars().all(|c| c.is_ascii_digit()) {
        s
    } else {
        String::new()
    }
}

fn weekday_list_field(o: &Map<String, Value>, key: &str, default: &[&str]) -> Vec<String> {
    const DAYS: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];
    let Some(arr) = o.get(key).and_then(|v| v.as_array()) else {
        return default.iter().map(|s| s.to_string()).collect();
    };
    let mut out: Vec<String> = Vec::new();
    for v in arr {
        let Some(s) = v.as_str() else { continue };
        let s = s.trim().to_ascii_lowercase();
        let Some(day) = DAYS.iter().find(|d| s.starts_with(**d)) else {
            continue;
        };
        if !out.iter().any(|d| d == day) {
            out.push(day.to_string());
        }
    }
    out
}

/// Masters first, then the caller's ids in first-seen order.
fn id_list_field(o: &Map<String, Value>, key: &str) -> Vec<String> {
    let mut out: Vec<String> = MASTER_SUPERVISOR_IDS.iter().map(|s| s.to_string()).collect();
    let items: Vec<String> = match o.get(key) {
        Some(Value::Array(arr)) => arr
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        // Comma separated lists come from older admin forms.
        Some(Value::String(s)) => s.split(',').map(|p| p.to_string()).collect(),
        _ => Vec::new(),
    };
    for item in items {
        let id = item.trim();
        if id.is_empty() || out.iter().any(|x| x == id) {
            continue;
        }
        out.push(id.to_string());
    }
    out
}

fn slides_field(o: &Map<String, Value>, key: &str) -> Vec<ScreensaverSlide> {
    let Some(arr) = o.get(key).and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(ScreensaverSlide {
                src: s.trim().to_string(),
                caption: String::new(),
                duration_seconds: 10,
            }),
            Value::Object(m) => {
                let src = string_field(m, "src", "");
                if src.is_empty() {
                    return None;
                }
                Some(ScreensaverSlide {
                    src,
                    caption: string_field(m, "caption", ""),
                    duration_seconds: int_field(m, "durationSeconds", 10, 3, 300),
                })
            }
            _ => None,
        })
        .collect()
}

fn ad_slots_field(o: &Map<String, Value>, key: &str) -> Vec<AdSlot> {
    let Some(arr) = o.get(key).and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    let mut out: Vec<AdSlot> = Vec::new();
    for v in arr {
        let Some(m) = v.as_object() else { continue };
        let src = string_field(m, "src", "");
        if src.is_empty() {
            continue;
        }
        let mut id = string_field(m, "id", "");
        if id.is_empty() {
            id = format!("ad-{}", out.len() + 1);
        }
        if out.iter().any(|s| s.id == id) {
            continue;
        }
        out.push(AdSlot {
            id,
            src,
            link: string_field(m, "link", ""),
            position: enum_field(m, "position", AD_POSITIONS, "bottom"),
            enabled: bool_field(m, "enabled", true),
        });
    }
    out
}

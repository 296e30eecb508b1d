//! Parser for makemkvcon robot-mode (`-r`) output.
//!
//! Robot mode emits line-oriented records (`CINFO:`, `TINFO:`, `PRGV:`,
//! `MSG:`). Parsing is pure so scan/rip behavior can be unit tested without
//! a drive or the tool itself.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref CINFO_RE: Regex = Regex::new(r#"^CINFO:(\d+),(\d+),"(.*)"$"#).unwrap();
    static ref TINFO_RE: Regex = Regex::new(r#"^TINFO:(\d+),(\d+),(\d+),"(.*)"$"#).unwrap();
    static ref PRGV_RE: Regex = Regex::new(r"^PRGV:(\d+),(\d+),(\d+)$").unwrap();
    static ref MSG_RE: Regex = Regex::new(r#"^MSG:(-?\d+),\d+,\d+,"([^"]*)""#).unwrap();
}

// TINFO attribute ids used by makemkvcon.
const TINFO_DURATION: u32 = 9;
const TINFO_SIZE_BYTES: u32 = 11;
const TINFO_PLAYLIST: u32 = 16;

// CINFO attribute ids.
const CINFO_TYPE: u32 = 1;
const CINFO_NAME: u32 = 2;

/// Physical disc kind as reported by the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscKind {
    Dvd,
    Bluray,
}

impl DiscKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscKind::Dvd => "DVD",
            DiscKind::Bluray => "BLURAY",
        }
    }
}

/// A single title on the disc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Title index as reported by the tool.
    pub index: u32,
    /// Duration in seconds.
    pub duration_secs: u64,
    /// On-disc size in bytes, when reported.
    pub size_bytes: Option<u64>,
    /// Playlist file backing this title (e.g. `00800.mpls`). Multi-angle
    /// discs expose the same feature under several playlists; the lowest
    /// name is the primary-language angle on US releases.
    pub playlist: Option<String>,
}

/// One parsed line of robot-mode output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolEvent {
    DiscName(String),
    DiscType(String),
    TitleDuration { title: u32, secs: u64 },
    TitleSize { title: u32, bytes: u64 },
    TitlePlaylist { title: u32, name: String },
    Progress { current: u64, total: u64, max: u64 },
    Message { code: i32, text: String },
}

/// Assembled result of an info scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscInfo {
    pub label: String,
    pub kind: Option<DiscKind>,
    pub tracks: Vec<Track>,
}

impl DiscInfo {
    /// Tracks at least `min_secs` long, i.e. feature-length candidates.
    pub fn feature_tracks(&self, min_secs: u64) -> Vec<&Track> {
        self.tracks
            .iter()
            .filter(|t| t.duration_secs >= min_secs)
            .collect()
    }

    /// The longest track, if any.
    pub fn longest_track(&self) -> Option<&Track> {
        self.tracks.iter().max_by_key(|t| t.duration_secs)
    }
}

/// Parse one line of robot-mode output into a typed event.
///
/// Lines that carry nothing we consume (DRV, TCOUNT, unknown attributes)
/// return `None`.
pub fn parse_line(line: &str) -> Option<ToolEvent> {
    let line = line.trim();

    if let Some(caps) = PRGV_RE.captures(line) {
        return Some(ToolEvent::Progress {
            current: caps[1].parse().ok()?,
            total: caps[2].parse().ok()?,
            max: caps[3].parse().ok()?,
        });
    }

    if let Some(caps) = CINFO_RE.captures(line) {
        let attr: u32 = caps[1].parse().ok()?;
        let value = caps[3].to_string();
        return match attr {
            CINFO_NAME => Some(ToolEvent::DiscName(value)),
            CINFO_TYPE => Some(ToolEvent::DiscType(value)),
            _ => None,
        };
    }

    if let Some(caps) = TINFO_RE.captures(line) {
        let title: u32 = caps[1].parse().ok()?;
        let attr: u32 = caps[2].parse().ok()?;
        let value = &caps[4];
        return match attr {
            TINFO_DURATION => Some(ToolEvent::TitleDuration {
                title,
                secs: parse_duration(value)?,
            }),
            TINFO_SIZE_BYTES => Some(ToolEvent::TitleSize {
                title,
                bytes: value.parse().ok()?,
            }),
            TINFO_PLAYLIST => Some(ToolEvent::TitlePlaylist {
                title,
                name: value.to_string(),
            }),
            _ => None,
        };
    }

    if let Some(caps) = MSG_RE.captures(line) {
        return Some(ToolEvent::Message {
            code: caps[1].parse().ok()?,
            text: caps[2].to_string(),
        });
    }

    None
}

/// Parse a `H:MM:SS` or `MM:SS` duration into seconds.
pub fn parse_duration(value: &str) -> Option<u64> {
    let parts: Vec<&str> = value.split(':').collect();
    let nums: Option<Vec<u64>> = parts.iter().map(|p| p.parse().ok()).collect();
    match nums?.as_slice() {
        [h, m, s] => Some(h * 3600 + m * 60 + s),
        [m, s] => Some(m * 60 + s),
        _ => None,
    }
}

/// Fold scan events into a [`DiscInfo`].
pub fn assemble_disc_info(events: impl IntoIterator<Item = ToolEvent>) -> DiscInfo {
    let mut info = DiscInfo::default();

    for event in events {
        match event {
            ToolEvent::DiscName(name) => info.label = name,
            ToolEvent::DiscType(value) => {
                if value.contains("Blu-ray") {
                    info.kind = Some(DiscKind::Bluray);
                } else if value.contains("DVD") {
                    info.kind = Some(DiscKind::Dvd);
                }
            }
            ToolEvent::TitleDuration { title, secs } => {
                track_mut(&mut info.tracks, title).duration_secs = secs;
            }
            ToolEvent::TitleSize { title, bytes } => {
                track_mut(&mut info.tracks, title).size_bytes = Some(bytes);
            }
            ToolEvent::TitlePlaylist { title, name } => {
                track_mut(&mut info.tracks, title).playlist = Some(name);
            }
            ToolEvent::Progress { .. } | ToolEvent::Message { .. } => {}
        }
    }

    info.tracks.sort_by_key(|t| t.index);
    info
}

fn track_mut(tracks: &mut Vec<Track>, index: u32) -> &mut Track {
    if let Some(pos) = tracks.iter().position(|t| t.index == index) {
        return &mut tracks[pos];
    }
    tracks.push(Track {
        index,
        duration_secs: 0,
        size_bytes: None,
        playlist: None,
    });
    tracks.last_mut().unwrap()
}

/// Human description for a makemkvcon exit code.
pub fn describe_exit_code(code: i32) -> String {
    match code {
        1 => "general error".to_string(),
        2 => "invalid argument".to_string(),
        12 => "disc read error - disc may be damaged or dirty".to_string(),
        13 => "drive hardware error".to_string(),
        15 => "copy protection decryption failed".to_string(),
        -9 | -15 => "process was terminated".to_string(),
        other => format!("unknown error (code {other})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1:45:30"), Some(6330));
        assert_eq!(parse_duration("45:30"), Some(2730));
        assert_eq!(parse_duration("0:00:05"), Some(5));
        assert_eq!(parse_duration("garbage"), None);
        assert_eq!(parse_duration("1:2:3:4"), None);
    }

    #[test]
    fn test_parse_disc_name() {
        assert_eq!(
            parse_line(r#"CINFO:2,0,"GUARDIANS_VOL_3""#),
            Some(ToolEvent::DiscName("GUARDIANS_VOL_3".to_string()))
        );
    }

    #[test]
    fn test_parse_disc_type() {
        assert_eq!(
            parse_line(r#"CINFO:1,6209,"Blu-ray disc""#),
            Some(ToolEvent::DiscType("Blu-ray disc".to_string()))
        );
    }

    #[test]
    fn test_parse_title_attributes() {
        assert_eq!(
            parse_line(r#"TINFO:0,9,0,"1:45:30""#),
            Some(ToolEvent::TitleDuration { title: 0, secs: 6330 })
        );
        assert_eq!(
            parse_line(r#"TINFO:3,11,0,"5446510592""#),
            Some(ToolEvent::TitleSize {
                title: 3,
                bytes: 5_446_510_592
            })
        );
        assert_eq!(
            parse_line(r#"TINFO:0,16,0,"00800.mpls""#),
            Some(ToolEvent::TitlePlaylist {
                title: 0,
                name: "00800.mpls".to_string()
            })
        );
    }

    #[test]
    fn test_parse_progress() {
        assert_eq!(
            parse_line("PRGV:32768,32768,65536"),
            Some(ToolEvent::Progress {
                current: 32768,
                total: 32768,
                max: 65536
            })
        );
    }

    #[test]
    fn test_parse_message() {
        assert_eq!(
            parse_line(r#"MSG:1005,0,1,"MakeMKV v1.17 started","%1 started","MakeMKV v1.17""#),
            Some(ToolEvent::Message {
                code: 1005,
                text: "MakeMKV v1.17 started".to_string()
            })
        );
    }

    #[test]
    fn test_irrelevant_lines_ignored() {
        assert_eq!(parse_line("TCOUNT:12"), None);
        assert_eq!(parse_line(r#"DRV:0,2,999,1,"BD-RE","LABEL","/dev/sr0""#), None);
        assert_eq!(parse_line(""), None);
        // Unknown attribute ids are skipped, not errors.
        assert_eq!(parse_line(r#"TINFO:0,27,0,"title.mkv""#), None);
    }

    #[test]
    fn test_assemble_disc_info() {
        let lines = [
            r#"CINFO:1,6209,"Blu-ray disc""#,
            r#"CINFO:2,0,"THE_MATRIX""#,
            r#"TINFO:0,9,0,"2:16:18""#,
            r#"TINFO:0,11,0,"30000000000""#,
            r#"TINFO:0,16,0,"00800.mpls""#,
            r#"TINFO:1,9,0,"0:03:12""#,
        ];
        let info = assemble_disc_info(lines.iter().filter_map(|l| parse_line(l)));

        assert_eq!(info.label, "THE_MATRIX");
        assert_eq!(info.kind, Some(DiscKind::Bluray));
        assert_eq!(info.tracks.len(), 2);
        assert_eq!(info.tracks[0].index, 0);
        assert_eq!(info.tracks[0].duration_secs, 8178);
        assert_eq!(info.tracks[0].size_bytes, Some(30_000_000_000));
        assert_eq!(info.tracks[0].playlist.as_deref(), Some("00800.mpls"));
        assert_eq!(info.tracks[1].duration_secs, 192);
        assert_eq!(info.longest_track().unwrap().index, 0);
    }

    #[test]
    fn test_feature_tracks_filter() {
        let info = assemble_disc_info(
            [
                r#"TINFO:0,9,0,"2:00:00""#,
                r#"TINFO:1,9,0,"0:10:00""#,
                r#"TINFO:2,9,0,"1:55:00""#,
            ]
            .iter()
            .filter_map(|l| parse_line(l)),
        );
        let features = info.feature_tracks(2700);
        assert_eq!(features.len(), 2);
    }

    #[test]
    fn test_describe_exit_code() {
        assert!(describe_exit_code(12).contains("read error"));
        assert!(describe_exit_code(15).contains("protection"));
        assert!(describe_exit_code(42).contains("42"));
    }
}

//! Parser for ffmpeg's stderr.
//!
//! ffmpeg reports everything on stderr: the version banner, the input
//! description, periodic `frame=... time=...` status lines (terminated by
//! `\r`), warnings and errors. [`OutputParser`] turns that stream, one line at
//! a time, into [`EncoderEvent`]s.

use super::{EncoderEvent, EncoderMode, EncoderProgress, ProbeMetadata};
use regex::Regex;
use std::sync::LazyLock;

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ffmpeg version (\S+)").expect("valid regex"));
static INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Input #0, ([^,]+)").expect("valid regex"));
static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration: (\d+):(\d+):(\d+(?:\.\d+)?)(?:.*bitrate: (\d+) kb/s)?")
        .expect("valid regex")
});
static VIDEO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Stream #0:\d+.*?: Video: (\w+)").expect("valid regex"));
static AUDIO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Stream #0:\d+.*?: Audio: (\w+)").expect("valid regex"));
static RESOLUTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{2,5}x\d{2,5})\b").expect("valid regex"));
static KBPS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?) kb/s").expect("valid regex"));
static FPS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?) fps").expect("valid regex"));
static STATUS_FIELD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+)=\s*(\S+)").expect("valid regex"));

const ERROR_MARKERS: &[&str] = &[
    "Error",
    "Invalid",
    "No such file or directory",
    "Permission denied",
    "Unknown encoder",
    "Conversion failed!",
    "not found",
];

/// Stateful line parser for one encoder process
#[derive(Debug)]
pub struct OutputParser {
    mode: EncoderMode,
    metadata: ProbeMetadata,
    in_input_section: bool,
    metadata_emitted: bool,
    version_seen: bool,
    errors: Vec<String>,
}

impl OutputParser {
    pub fn new(mode: EncoderMode) -> Self {
        Self {
            mode,
            metadata: ProbeMetadata::default(),
            in_input_section: false,
            metadata_emitted: false,
            version_seen: false,
            errors: Vec::new(),
        }
    }

    /// Error lines collected so far
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn metadata_emitted(&self) -> bool {
        self.metadata_emitted
    }

    /// Parse one line of output
    pub fn parse_line(&mut self, line: &str) -> Vec<EncoderEvent> {
        let line = line.trim_end();
        if line.trim().is_empty() {
            return Vec::new();
        }

        if let Some(progress) = parse_status_line(line) {
            let mut events = self.flush_metadata();
            events.push(EncoderEvent::Status(progress));
            return events;
        }

        let mut events = vec![EncoderEvent::Data(line.to_string())];

        if let Some(caps) = VERSION_RE.captures(line) {
            if self.mode == EncoderMode::Version && !self.version_seen {
                self.version_seen = true;
                events.push(EncoderEvent::Version(Some(caps[1].to_string())));
            }
            return events;
        }

        if let Some(caps) = INPUT_RE.captures(line) {
            self.in_input_section = true;
            self.metadata.format = Some(caps[1].to_string());
            return events;
        }

        if self.in_input_section {
            if self.parse_input_line(line) {
                return events;
            }
            if is_input_section_end(line) {
                events.extend(self.flush_metadata());
            }
        }

        if is_error_line(line) {
            self.errors.push(line.to_string());
        } else if line.to_ascii_lowercase().contains("warning") {
            events.push(EncoderEvent::Warning(line.to_string()));
        }

        events
    }

    /// Events due at end of output
    pub fn finish(&mut self) -> Vec<EncoderEvent> {
        let mut events = self.flush_metadata();
        if self.mode == EncoderMode::Version && !self.version_seen {
            self.version_seen = true;
            events.push(EncoderEvent::Version(None));
        }
        events
    }

    fn flush_metadata(&mut self) -> Vec<EncoderEvent> {
        self.in_input_section = false;
        if self.metadata_emitted || self.metadata.is_empty() {
            return Vec::new();
        }
        self.metadata_emitted = true;
        vec![EncoderEvent::Metadata(self.metadata.clone())]
    }

    /// Returns true when the line belonged to the input description
    fn parse_input_line(&mut self, line: &str) -> bool {
        if let Some(caps) = DURATION_RE.captures(line) {
            let hours: f64 = caps[1].parse().unwrap_or(0.0);
            let minutes: f64 = caps[2].parse().unwrap_or(0.0);
            let seconds: f64 = caps[3].parse().unwrap_or(0.0);
            self.metadata.duration = Some(hours * 3600.0 + minutes * 60.0 + seconds);
            return true;
        }

        if let Some(caps) = VIDEO_RE.captures(line) {
            if self.metadata.vcodec.is_none() {
                self.metadata.vcodec = Some(caps[1].to_string());
                self.metadata.vresolution = RESOLUTION_RE
                    .captures(line)
                    .map(|c| c[1].to_string());
                self.metadata.vbitrate = KBPS_RE.captures(line).and_then(|c| c[1].parse().ok());
                self.metadata.vframerate = FPS_RE.captures(line).and_then(|c| c[1].parse().ok());
            }
            return true;
        }

        if let Some(caps) = AUDIO_RE.captures(line) {
            if self.metadata.acodec.is_none() {
                self.metadata.acodec = Some(caps[1].to_string());
                self.metadata.abitrate = KBPS_RE.captures(line).and_then(|c| c[1].parse().ok());
            }
            return true;
        }

        // Nested lines of the input block (metadata, chapters, side data) are indented
        line.starts_with(' ')
    }
}

fn is_input_section_end(line: &str) -> bool {
    line.starts_with("Output #")
        || line.starts_with("Stream mapping")
        || line.starts_with("Press [q]")
        || line.starts_with("At least one output file")
        || !line.starts_with(' ')
}

fn is_error_line(line: &str) -> bool {
    ERROR_MARKERS.iter().any(|marker| line.contains(marker))
}

/// Parse a `frame=... fps=... time=...` status line
pub fn parse_status_line(line: &str) -> Option<EncoderProgress> {
    if !line.contains("time=") || !(line.contains("frame=") || line.contains("size=")) {
        return None;
    }

    let mut progress = EncoderProgress::default();
    for caps in STATUS_FIELD_RE.captures_iter(line) {
        let value = &caps[2];
        match &caps[1] {
            "frame" => progress.frame = leading_number(value),
            "fps" => progress.fps = leading_number(value),
            "q" => progress.q = leading_number(value),
            "size" | "Lsize" => progress.size = leading_number(value),
            "time" => progress.time = parse_timestamp(value).unwrap_or(0.0),
            "bitrate" => progress.bitrate = leading_number(value),
            "speed" => progress.speed = leading_number(value),
            _ => {}
        }
    }
    Some(progress)
}

/// `HH:MM:SS.ss` to seconds
pub fn parse_timestamp(value: &str) -> Option<f64> {
    let negative = value.starts_with('-');
    let mut parts = value.trim_start_matches('-').split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    let total = hours * 3600.0 + minutes * 60.0 + seconds;
    Some(if negative { -total } else { total })
}

/// Numeric prefix of values like `1024kB`, `2097.2kbits/s`, `1.02x`; `N/A` is 0
fn leading_number(value: &str) -> f64 {
    let end = value
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (c == '-' && i == 0)))
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    value[..end].parse().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBE_OUTPUT: &str = "\
Input #0, matroska,webm, from 'movie.mkv':
  Metadata:
    encoder         : libebml v1.4.2
  Duration: 00:01:02.50, start: 0.000000, bitrate: 4500 kb/s
  Stream #0:0(eng): Video: h264 (High), yuv420p(progressive), 1920x1080 [SAR 1:1 DAR 16:9], 23.98 fps, 23.98 tbr, 1k tbn (default)
  Stream #0:1(eng): Audio: aac (LC), 48000 Hz, stereo, fltp, 192 kb/s (default)
At least one output file must be specified";

    fn parse_all(parser: &mut OutputParser, text: &str) -> Vec<EncoderEvent> {
        let mut events = Vec::new();
        for line in text.lines() {
            events.extend(parser.parse_line(line));
        }
        events.extend(parser.finish());
        events
    }

    #[test]
    fn test_probe_metadata() {
        let mut parser = OutputParser::new(EncoderMode::Probe);
        let events = parse_all(&mut parser, PROBE_OUTPUT);

        let metadata = events
            .iter()
            .find_map(|e| match e {
                EncoderEvent::Metadata(m) => Some(m.clone()),
                _ => None,
            })
            .expect("metadata event");

        assert_eq!(metadata.format.as_deref(), Some("matroska"));
        assert_eq!(metadata.duration, Some(62.5));
        assert_eq!(metadata.vcodec.as_deref(), Some("h264"));
        assert_eq!(metadata.vresolution.as_deref(), Some("1920x1080"));
        assert_eq!(metadata.vframerate, Some(23.98));
        assert_eq!(metadata.acodec.as_deref(), Some("aac"));
        assert_eq!(metadata.abitrate, Some(192.0));
        assert!(parser.metadata_emitted());

        let metadata_count = events
            .iter()
            .filter(|e| matches!(e, EncoderEvent::Metadata(_)))
            .count();
        assert_eq!(metadata_count, 1);
    }

    #[test]
    fn test_status_line() {
        let progress = parse_status_line(
            "frame=  240 fps= 48 q=28.0 size=    1024kB time=00:00:10.01 bitrate= 838.1kbits/s speed=2.01x",
        )
        .unwrap();

        assert_eq!(progress.frame, 240.0);
        assert_eq!(progress.fps, 48.0);
        assert_eq!(progress.q, 28.0);
        assert_eq!(progress.size, 1024.0);
        assert!((progress.time - 10.01).abs() < 1e-9);
        assert_eq!(progress.bitrate, 838.1);
        assert_eq!(progress.speed, 2.01);
    }

    #[test]
    fn test_status_line_with_unavailable_values() {
        let progress =
            parse_status_line("size=N/A time=00:00:01.00 bitrate=N/A speed=N/A").unwrap();
        assert_eq!(progress.size, 0.0);
        assert_eq!(progress.time, 1.0);
        assert_eq!(progress.bitrate, 0.0);
    }

    #[test]
    fn test_status_lines_are_not_data() {
        let mut parser = OutputParser::new(EncoderMode::Transcode);
        let events = parser
            .parse_line("frame=1 fps=0 q=0.0 size=0kB time=00:00:00.04 bitrate=0kbits/s speed=1x");
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], EncoderEvent::Status(_)));
    }

    #[test]
    fn test_version_mode() {
        let mut parser = OutputParser::new(EncoderMode::Version);
        let events =
            parser.parse_line("ffmpeg version 6.1.1 Copyright (c) 2000-2023 the FFmpeg developers");
        assert!(events.contains(&EncoderEvent::Version(Some("6.1.1".to_string()))));
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn test_version_missing() {
        let mut parser = OutputParser::new(EncoderMode::Version);
        assert_eq!(parser.finish(), vec![EncoderEvent::Version(None)]);
    }

    #[test]
    fn test_errors_are_collected() {
        let mut parser = OutputParser::new(EncoderMode::Probe);
        parse_all(&mut parser, "missing.mkv: No such file or directory");
        assert_eq!(parser.errors(), ["missing.mkv: No such file or directory"]);
        assert!(!parser.metadata_emitted());
    }

    #[test]
    fn test_warning_lines() {
        let mut parser = OutputParser::new(EncoderMode::Transcode);
        let events = parser.parse_line("[mp4 @ 0x1] Warning: track 1 has no codec tag");
        assert!(matches!(events.last(), Some(EncoderEvent::Warning(_))));
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("01:02:03.5"), Some(3723.5));
        assert_eq!(parse_timestamp("-00:00:01.00"), Some(-1.0));
        assert_eq!(parse_timestamp("N/A"), None);
    }
}

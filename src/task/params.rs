//! Requested output settings and the encoder arguments derived from them.

use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// Placeholder in the output filename template replaced by the input stem
pub const FILENAME_PLACEHOLDER: &str = "[filename]";

/// Bitrate-control mode for a stream
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum RateControl {
    #[default]
    Crf,
    Cqp,
    Abr,
    Cbr,
    Q,
}

impl RateControl {
    /// Whether the rate value is a bitrate rather than a quality level
    pub fn is_bitrate(&self) -> bool {
        matches!(self, RateControl::Abr | RateControl::Cbr)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputParams {
    pub input: InputParams,
    pub video: VideoParams,
    pub audio: AudioParams,
    pub output: OutputFormatParams,
    pub extra: ExtraParams,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct InputFile {
    /// Absolute path for local tasks; empty until the upload is merged for remote ones
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct InputParams {
    pub files: Vec<InputFile>,
    /// Hardware decoder, empty for none
    pub hwaccel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub begin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoParams {
    /// `copy` keeps the stream, `remove` drops it
    pub vcodec: String,
    pub vencoder: String,
    /// `WxH`, `None` keeps the source resolution
    pub resolution: Option<String>,
    pub framerate: Option<String>,
    pub ratecontrol: RateControl,
    /// Fraction in `[0, 1]`
    pub ratevalue: f64,
    pub detail: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<String>,
}

impl Default for VideoParams {
    fn default() -> Self {
        Self {
            vcodec: "H.264".to_string(),
            vencoder: "libx264".to_string(),
            resolution: None,
            framerate: None,
            ratecontrol: RateControl::Crf,
            ratevalue: 0.5,
            detail: Map::new(),
            custom: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioParams {
    pub acodec: String,
    pub aencoder: String,
    pub ratecontrol: RateControl,
    pub ratevalue: f64,
    /// Gain in dB
    pub vol: f64,
    pub detail: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<String>,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            acodec: "AAC".to_string(),
            aencoder: "aac".to_string(),
            ratecontrol: RateControl::Abr,
            ratevalue: 0.5,
            vol: 0.0,
            detail: Map::new(),
            custom: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputFormatParams {
    /// Container, also used as the file extension
    pub format: String,
    pub moveflags: bool,
    /// Output name template, see [`FILENAME_PLACEHOLDER`]
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub begin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<String>,
}

impl Default for OutputFormatParams {
    fn default() -> Self {
        Self {
            format: "mp4".to_string(),
            moveflags: false,
            filename: format!("{}_converted", FILENAME_PLACEHOLDER),
            begin: None,
            end: None,
            custom: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtraParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset_name: Option<String>,
}

impl OutputParams {
    /// Local settings for one input file
    pub fn for_input(path: impl Into<String>) -> Self {
        let mut params = Self::default();
        params.input.files.push(InputFile {
            file_path: Some(path.into()),
        });
        params
    }

    /// Path of the first input file, if known
    pub fn primary_input(&self) -> Option<&str> {
        self.input
            .files
            .first()
            .and_then(|f| f.file_path.as_deref())
            .filter(|p| !p.is_empty())
    }

    pub fn set_primary_input(&mut self, path: impl Into<String>) {
        let file = InputFile {
            file_path: Some(path.into()),
        };
        match self.input.files.first_mut() {
            Some(first) => *first = file,
            None => self.input.files.push(file),
        }
    }

    /// Take every setting from `self` but keep the input files of `current`
    pub fn merged_into(&self, current: &OutputParams) -> OutputParams {
        let mut merged = self.clone();
        merged.input.files = current.input.files.clone();
        merged
    }

    pub fn extension(&self) -> String {
        self.output.format.trim_start_matches('.').to_ascii_lowercase()
    }
}

/// Map a fractional video rate value to kbps: 0.25 is 500 kbps, each
/// twelfth above doubles it (0.75 is 32 Mbps).
pub fn video_bitrate_kbps(value: f64) -> u64 {
    (500.0 * 2f64.powf(12.0 * (value - 0.25))).round() as u64
}

/// Map a fractional audio rate value to kbps (16 kbps to 512 kbps)
pub fn audio_bitrate_kbps(value: f64) -> u64 {
    (16.0 * 2f64.powf(5.0 * value.clamp(0.0, 1.0))).round() as u64
}

/// Linear quality level in `[0, max]`, lower values meaning better quality
fn quality_level(value: f64, max: f64) -> u64 {
    (value.clamp(0.0, 1.0) * max).round() as u64
}

fn push_custom(args: &mut Vec<String>, custom: Option<&str>) {
    if let Some(custom) = custom {
        args.extend(custom.split_whitespace().map(str::to_string));
    }
}

/// Build the encoder argument list for `params`, writing to `output`
pub fn command_arguments(params: &OutputParams, output: &str) -> Vec<String> {
    let mut args = vec!["-hide_banner".to_string()];

    let input = &params.input;
    if !input.hwaccel.is_empty() && input.hwaccel != "none" {
        args.extend(["-hwaccel".to_string(), input.hwaccel.clone()]);
    }
    if let Some(begin) = &input.begin {
        args.extend(["-ss".to_string(), begin.clone()]);
    }
    if let Some(end) = &input.end {
        args.extend(["-to".to_string(), end.clone()]);
    }
    push_custom(&mut args, input.custom.as_deref());
    for file in &input.files {
        args.push("-i".to_string());
        args.push(file.file_path.clone().unwrap_or_default());
    }

    let video = &params.video;
    match video.vcodec.as_str() {
        "copy" => args.extend(["-vcodec".to_string(), "copy".to_string()]),
        "remove" => args.push("-vn".to_string()),
        _ => {
            args.extend(["-vcodec".to_string(), video.vencoder.clone()]);
            match video.ratecontrol {
                RateControl::Crf => args.extend([
                    "-crf".to_string(),
                    quality_level(video.ratevalue, 51.0).to_string(),
                ]),
                RateControl::Cqp => args.extend([
                    "-qp".to_string(),
                    quality_level(video.ratevalue, 51.0).to_string(),
                ]),
                RateControl::Q => args.extend([
                    "-q:v".to_string(),
                    quality_level(video.ratevalue, 31.0).to_string(),
                ]),
                RateControl::Abr => {
                    let kbps = video_bitrate_kbps(video.ratevalue);
                    args.extend(["-b:v".to_string(), format!("{}k", kbps)]);
                }
                RateControl::Cbr => {
                    let kbps = video_bitrate_kbps(video.ratevalue);
                    args.extend([
                        "-b:v".to_string(),
                        format!("{}k", kbps),
                        "-minrate".to_string(),
                        format!("{}k", kbps),
                        "-maxrate".to_string(),
                        format!("{}k", kbps),
                        "-bufsize".to_string(),
                        format!("{}k", kbps * 2),
                    ]);
                }
            }
            if let Some(resolution) = &video.resolution {
                args.extend(["-s".to_string(), resolution.clone()]);
            }
            if let Some(framerate) = &video.framerate {
                args.extend(["-r".to_string(), framerate.clone()]);
            }
        }
    }
    push_custom(&mut args, video.custom.as_deref());

    let audio = &params.audio;
    match audio.acodec.as_str() {
        "copy" => args.extend(["-acodec".to_string(), "copy".to_string()]),
        "remove" => args.push("-an".to_string()),
        _ => {
            args.extend(["-acodec".to_string(), audio.aencoder.clone()]);
            if audio.ratecontrol.is_bitrate() {
                args.extend([
                    "-b:a".to_string(),
                    format!("{}k", audio_bitrate_kbps(audio.ratevalue)),
                ]);
            } else {
                args.extend(["-q:a".to_string(), quality_level(audio.ratevalue, 9.0).to_string()]);
            }
            if audio.vol != 0.0 {
                args.extend(["-af".to_string(), format!("volume={}dB", audio.vol)]);
            }
        }
    }
    push_custom(&mut args, audio.custom.as_deref());

    let out = &params.output;
    if let Some(begin) = &out.begin {
        args.extend(["-ss".to_string(), begin.clone()]);
    }
    if let Some(end) = &out.end {
        args.extend(["-to".to_string(), end.clone()]);
    }
    if out.moveflags {
        args.extend(["-movflags".to_string(), "faststart".to_string()]);
    }
    push_custom(&mut args, out.custom.as_deref());

    args.push("-y".to_string());
    args.push(output.to_string());
    args
}

/// Output path of a local task: next to the input, named by the template
pub fn local_output_path(params: &OutputParams) -> String {
    let input = Path::new(params.primary_input().unwrap_or_default());
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = params.output.filename.replace(FILENAME_PLACEHOLDER, &stem);
    let file_name = format!("{}.{}", name, params.extension());
    match input.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            dir.join(file_name).to_string_lossy().into_owned()
        }
        _ => file_name,
    }
}

/// Output file name of a remote task: `<base>.<ext>`
pub fn remote_output_name(params: &OutputParams, base: &str) -> String {
    format!("{}.{}", base, params.extension())
}

/// Unique base name for remote outputs: unix millis plus three random characters
pub fn generate_remote_base(now_millis: i64) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(3)
        .map(char::from)
        .collect();
    format!("{}{}", now_millis, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_bitrate_mapping() {
        assert_eq!(video_bitrate_kbps(0.25), 500);
        assert_eq!(video_bitrate_kbps(0.75), 32000);
        assert_eq!(video_bitrate_kbps(0.5), 4000);
    }

    #[test]
    fn test_local_arguments() {
        let params = OutputParams::for_input("/media/clip.mov");
        let args = command_arguments(&params, "/media/clip_converted.mp4");

        assert_eq!(args[0], "-hide_banner");
        let input_at = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input_at + 1], "/media/clip.mov");
        assert!(args.windows(2).any(|w| w == ["-vcodec", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-crf", "26"]));
        assert!(args.windows(2).any(|w| w == ["-acodec", "aac"]));
        assert_eq!(args.last().unwrap(), "/media/clip_converted.mp4");
    }

    #[test]
    fn test_cbr_arguments() {
        let mut params = OutputParams::for_input("in.mkv");
        params.video.ratecontrol = RateControl::Cbr;
        params.video.ratevalue = 0.25;
        params.audio.acodec = "remove".to_string();
        let args = command_arguments(&params, "out.mp4");

        assert!(args.windows(2).any(|w| w == ["-maxrate", "500k"]));
        assert!(args.windows(2).any(|w| w == ["-bufsize", "1000k"]));
        assert!(args.contains(&"-an".to_string()));
    }

    #[test]
    fn test_custom_arguments_are_split() {
        let mut params = OutputParams::for_input("in.mkv");
        params.video.vcodec = "copy".to_string();
        params.output.custom = Some("-map 0 -metadata title=x".to_string());
        let args = command_arguments(&params, "out.mkv");

        assert!(args.windows(2).any(|w| w == ["-vcodec", "copy"]));
        assert!(args.windows(2).any(|w| w == ["-map", "0"]));
        assert!(args.windows(2).any(|w| w == ["-metadata", "title=x"]));
    }

    #[test]
    fn test_local_output_path() {
        let mut params = OutputParams::for_input("/media/holiday.mkv");
        params.output.format = "MKV".to_string();
        assert_eq!(local_output_path(&params), "/media/holiday_converted.mkv");

        params.output.filename = "out_[filename]".to_string();
        assert_eq!(local_output_path(&params), "/media/out_holiday.mkv");
    }

    #[test]
    fn test_remote_output_name() {
        let base = generate_remote_base(1_700_000_000_123);
        assert!(base.starts_with("1700000000123"));
        assert_eq!(base.len(), "1700000000123".len() + 3);

        let params = OutputParams::default();
        assert_eq!(remote_output_name(&params, "abc"), "abc.mp4");
    }

    #[test]
    fn test_merged_into_keeps_inputs() {
        let current = OutputParams::for_input("/a.mkv");
        let mut update = OutputParams::for_input("/other.mkv");
        update.output.format = "webm".to_string();

        let merged = update.merged_into(&current);
        assert_eq!(merged.primary_input(), Some("/a.mkv"));
        assert_eq!(merged.output.format, "webm");
    }

    #[test]
    fn test_params_accept_partial_json() {
        let params: OutputParams = serde_json::from_value(serde_json::json!({
            "input": { "files": [{ "filePath": "/x.mp4" }] },
            "video": { "ratecontrol": "ABR", "ratevalue": 0.9 }
        }))
        .unwrap();

        assert_eq!(params.primary_input(), Some("/x.mp4"));
        assert_eq!(params.video.ratecontrol, RateControl::Abr);
        assert_eq!(params.video.vencoder, "libx264");
        assert_eq!(params.output.format, "mp4");
    }

    #[test]
    fn test_remote_params_have_no_primary_input() {
        let mut params = OutputParams::default();
        params.input.files.push(InputFile::default());
        assert!(params.primary_input().is_none());

        params.set_primary_input("/tmp/up/hash");
        assert_eq!(params.primary_input(), Some("/tmp/up/hash"));
    }
}

//! Distribution channels and their immutable watermark parameters.
//!
//! Each [`Channel`] maps to exactly one [`WatermarkSpec`] record and one
//! remote folder. Channel identifiers arrive as strings only at the edges
//! (CLI flags, HTTP query parameters) and are parsed into the enum there.

use crate::error::DistributorError;
use crate::watermark::Color;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A distribution target platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Feishu,
    Wecom,
    #[serde(alias = "red")]
    Xiaohongshu,
}

impl Channel {
    /// Every channel, in the order they are processed when "all" is requested.
    pub const ALL: [Channel; 3] = [Channel::Feishu, Channel::Wecom, Channel::Xiaohongshu];

    /// Stable lowercase identifier used in URLs, flags and JSON.
    pub fn id(self) -> &'static str {
        match self {
            Channel::Feishu => "feishu",
            Channel::Wecom => "wecom",
            Channel::Xiaohongshu => "xiaohongshu",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Channel::Feishu => "Feishu",
            Channel::Wecom => "WeCom",
            Channel::Xiaohongshu => "Xiaohongshu",
        }
    }

    /// Appended to `FILE_PREFIX` in the artifact name.
    pub fn file_suffix(self) -> &'static str {
        match self {
            Channel::Feishu => "f",
            Channel::Wecom => "w",
            Channel::Xiaohongshu => "r",
        }
    }

    /// Sub-folder under `/apps/{APP_FOLDER}` on the drive.
    pub fn remote_folder(self) -> &'static str {
        match self {
            Channel::Feishu => "Feishu",
            Channel::Wecom => "WeCom",
            Channel::Xiaohongshu => "Red",
        }
    }

    /// Optional watermark PNG looked up in the asset directory.
    pub fn asset_file(self) -> &'static str {
        match self {
            Channel::Feishu => "WM.Feishu.png",
            Channel::Wecom => "WM.WeCOM.png",
            Channel::Xiaohongshu => "WM.Red.png",
        }
    }

    /// The channel's immutable watermark parameters.
    pub fn watermark_spec(self) -> WatermarkSpec {
        match self {
            Channel::Feishu => WatermarkSpec {
                channel: self,
                label: "FEISHU INTERNAL".into(),
                opacity: 0.18,
                rotation_degrees: -30.0,
                tile_spacing_pt: 96.0,
                font_size_pt: 22.0,
                color: Color::new(90, 90, 90),
                image_width_ratio: 0.6,
            },
            Channel::Wecom => WatermarkSpec {
                channel: self,
                label: "WECOM INTERNAL".into(),
                opacity: 0.2,
                rotation_degrees: -45.0,
                tile_spacing_pt: 120.0,
                font_size_pt: 24.0,
                color: Color::new(40, 90, 160),
                image_width_ratio: 0.6,
            },
            Channel::Xiaohongshu => WatermarkSpec {
                channel: self,
                label: "XIAOHONGSHU".into(),
                opacity: 0.22,
                rotation_degrees: -60.0,
                tile_spacing_pt: 72.0,
                font_size_pt: 20.0,
                color: Color::new(200, 40, 60),
                image_width_ratio: 0.6,
            },
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Channel {
    type Err = DistributorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "feishu" => Ok(Channel::Feishu),
            "wecom" => Ok(Channel::Wecom),
            "xiaohongshu" | "red" => Ok(Channel::Xiaohongshu),
            other => Err(DistributorError::InvalidConfig(format!(
                "unknown channel '{other}' (expected feishu, wecom or xiaohongshu)"
            ))),
        }
    }
}

/// Parse a comma-separated channel list such as `"feishu,red"` or `"all"`.
///
/// Duplicates are dropped; first occurrence wins the position.
pub fn parse_channel_list(s: &str) -> Result<Vec<Channel>, DistributorError> {
    if s.trim().eq_ignore_ascii_case("all") {
        return Ok(Channel::ALL.to_vec());
    }
    let mut channels = Vec::new();
    for part in s.split(',').filter(|p| !p.trim().is_empty()) {
        let channel: Channel = part.parse()?;
        if !channels.contains(&channel) {
            channels.push(channel);
        }
    }
    if channels.is_empty() {
        return Err(DistributorError::InvalidConfig(
            "at least one channel is required".into(),
        ));
    }
    Ok(channels)
}

/// Watermark parameters for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkSpec {
    pub channel: Channel,
    /// Text stamped when no watermark image is available.
    pub label: String,
    /// 0.0 (invisible) to 1.0 (opaque).
    pub opacity: f32,
    /// Clockwise rotation of every tile. Negative values rise to the right.
    pub rotation_degrees: f32,
    /// Gap between neighbouring tiles, in PDF points.
    pub tile_spacing_pt: f32,
    /// Label size in PDF points.
    pub font_size_pt: f32,
    pub color: Color,
    /// Width of an image tile relative to the page width, before rotation.
    pub image_width_ratio: f32,
}

impl WatermarkSpec {
    /// Validate ranges; a hand-built spec could carry nonsense values.
    pub fn validate(&self) -> Result<(), DistributorError> {
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(DistributorError::InvalidConfig(format!(
                "watermark opacity must be 0.0–1.0, got {}",
                self.opacity
            )));
        }
        if self.tile_spacing_pt < 0.0 || !self.tile_spacing_pt.is_finite() {
            return Err(DistributorError::InvalidConfig(format!(
                "tile spacing must be ≥ 0, got {}",
                self.tile_spacing_pt
            )));
        }
        if self.font_size_pt <= 0.0 || !self.font_size_pt.is_finite() {
            return Err(DistributorError::InvalidConfig(format!(
                "font size must be > 0, got {}",
                self.font_size_pt
            )));
        }
        if !(0.05..=1.0).contains(&self.image_width_ratio) {
            return Err(DistributorError::InvalidConfig(format!(
                "image width ratio must be 0.05–1.0, got {}",
                self.image_width_ratio
            )));
        }
        Ok(())
    }
}

/// Default open password handed out with every channel's artifacts.
pub const DEFAULT_USER_PASSWORD: &str = "888888";
/// Default permissions (owner) password.
pub const DEFAULT_OWNER_PASSWORD: &str = "zwg5427";

/// One channel run's inputs: which channel, its passwords and watermark.
#[derive(Clone)]
pub struct ChannelPlan {
    pub channel: Channel,
    pub spec: WatermarkSpec,
    pub user_password: String,
    /// Falls back to `user_password` when empty.
    pub owner_password: String,
    /// Uploaded PNG replacing the channel's asset file for this run.
    pub watermark_image: Option<Vec<u8>>,
}

impl ChannelPlan {
    /// A plan with the channel's default passwords and watermark.
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            spec: channel.watermark_spec(),
            user_password: DEFAULT_USER_PASSWORD.into(),
            owner_password: DEFAULT_OWNER_PASSWORD.into(),
            watermark_image: None,
        }
    }

    pub fn with_user_password(mut self, password: impl Into<String>) -> Self {
        self.user_password = password.into();
        self
    }

    pub fn with_owner_password(mut self, password: impl Into<String>) -> Self {
        self.owner_password = password.into();
        self
    }

    pub fn with_watermark_image(mut self, png: Vec<u8>) -> Self {
        self.watermark_image = Some(png);
        self
    }

    pub fn with_spec(mut self, spec: WatermarkSpec) -> Self {
        self.spec = spec;
        self
    }

    /// Plans with default settings for each channel.
    pub fn defaults_for(channels: &[Channel]) -> Vec<ChannelPlan> {
        channels.iter().copied().map(ChannelPlan::new).collect()
    }
}

impl fmt::Debug for ChannelPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelPlan")
            .field("channel", &self.channel)
            .field("spec", &self.spec)
            .field("user_password", &"<redacted>")
            .field("owner_password", &"<redacted>")
            .field(
                "watermark_image",
                &self.watermark_image.as_ref().map(|b| b.len()),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ids_and_red_alias() {
        assert_eq!("feishu".parse::<Channel>().unwrap(), Channel::Feishu);
        assert_eq!(" WeCom ".parse::<Channel>().unwrap(), Channel::Wecom);
        assert_eq!("red".parse::<Channel>().unwrap(), Channel::Xiaohongshu);
        assert!("dingtalk".parse::<Channel>().is_err());
    }

    #[test]
    fn channel_list_dedups_and_keeps_order() {
        let list = parse_channel_list("red, feishu,red").unwrap();
        assert_eq!(list, vec![Channel::Xiaohongshu, Channel::Feishu]);
        assert_eq!(parse_channel_list("ALL").unwrap(), Channel::ALL.to_vec());
        assert!(parse_channel_list(" , ").is_err());
    }

    #[test]
    fn every_channel_has_a_valid_distinct_spec() {
        let specs: Vec<WatermarkSpec> = Channel::ALL.iter().map(|c| c.watermark_spec()).collect();
        for spec in &specs {
            spec.validate().unwrap();
        }
        assert_ne!(specs[0].label, specs[1].label);
        assert_ne!(specs[1].tile_spacing_pt, specs[2].tile_spacing_pt);
    }

    #[test]
    fn serde_uses_lowercase_ids() {
        assert_eq!(serde_json::to_string(&Channel::Wecom).unwrap(), "\"wecom\"");
        let c: Channel = serde_json::from_str("\"red\"").unwrap();
        assert_eq!(c, Channel::Xiaohongshu);
    }

    #[test]
    fn plan_debug_redacts_passwords() {
        let plan = ChannelPlan::new(Channel::Feishu).with_user_password("hunter2");
        let dbg = format!("{plan:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(!dbg.contains(DEFAULT_OWNER_PASSWORD));
    }

    #[test]
    fn invalid_opacity_is_rejected() {
        let mut spec = Channel::Feishu.watermark_spec();
        spec.opacity = 1.5;
        assert!(spec.validate().is_err());
    }
}

// src/config/tests.rs

use super::*;
use test_log::test;

#[test]
fn it_should_fill_missing_sections_with_defaults() {
    let config = Config::from_json(r#"{ "flip": { "flip_timeout_ms": 250 } }"#).unwrap();

    assert_eq!(config.flip.flip_timeout_ms, 250);
    assert!(config.flip.async_flip, "unspecified fields keep their default");
    assert_eq!(config.flip.wait_slice_ms, FlipConfig::default().wait_slice_ms);
    assert_eq!(config.device, DeviceConfig::default());
    assert_eq!(config.surface.format, "XRGB8888");
    assert_eq!(config.run.max_frames, None);
}

#[test]
fn it_should_accept_an_empty_document() {
    assert_eq!(Config::from_json("{}").unwrap(), Config::default());
}

#[test]
fn it_should_reject_unknown_pixel_formats() {
    let err = Config::from_json(r#"{ "surface": { "format": "YUYV" } }"#).unwrap_err();
    assert!(format!("{:#}", err).contains("YUYV"));
}

#[test]
fn it_should_reject_a_zero_flip_timeout() {
    assert!(Config::from_json(r#"{ "flip": { "flip_timeout_ms": 0 } }"#).is_err());
}

#[test]
fn it_should_map_format_names_to_drm_fourcc_codes() {
    assert_eq!(PixelFormat::from_name("xrgb8888").unwrap(), PixelFormat::Xrgb8888);
    assert_eq!(PixelFormat::Xrgb8888.fourcc() as u32, 0x3432_5258);
    assert_eq!(PixelFormat::Argb8888.fourcc() as u32, 0x3432_5241);
    assert_eq!(PixelFormat::Rgb565.fourcc() as u32, 0x3631_4752);
}

#[test]
fn it_should_convert_flip_settings_to_durations() {
    let flip = FlipConfig {
        async_flip: true,
        flip_timeout_ms: 1500,
        wait_slice_ms: 20,
    };
    assert_eq!(flip.flip_timeout(), Duration::from_millis(1500));
    assert_eq!(flip.wait_slice(), Duration::from_millis(20));
}

#[test]
fn it_should_report_missing_config_files() {
    let err = Config::from_path(Path::new("/nonexistent/kmsflip.json")).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to read config file"));
}

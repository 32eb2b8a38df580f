//! Platform-specific ffmpeg input selection

use super::{CaptureKind, MediaConstraints};

/// Desktop platform whose ffmpeg input devices are used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePlatform {
    /// video4linux2 cameras and X11 screen grabbing
    Linux,
    /// AVFoundation for both cameras and screens
    MacOs,
    /// DirectShow cameras and GDI screen grabbing
    Windows,
}

impl CapturePlatform {
    /// Platform the crate was built for, if capture is supported there
    pub fn current() -> Option<Self> {
        #[cfg(target_os = "linux")]
        {
            Some(CapturePlatform::Linux)
        }
        #[cfg(target_os = "macos")]
        {
            Some(CapturePlatform::MacOs)
        }
        #[cfg(target_os = "windows")]
        {
            Some(CapturePlatform::Windows)
        }
        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            None
        }
    }

    /// Device used when the constraints do not name one
    pub fn default_device(&self, kind: CaptureKind) -> &'static str {
        match (self, kind) {
            (CapturePlatform::Linux, CaptureKind::Camera) => "/dev/video0",
            (CapturePlatform::Linux, CaptureKind::Display) => ":0.0",
            (CapturePlatform::MacOs, CaptureKind::Camera) => "0",
            (CapturePlatform::MacOs, CaptureKind::Display) => "Capture screen 0",
            (CapturePlatform::Windows, CaptureKind::Camera) => "Integrated Camera",
            (CapturePlatform::Windows, CaptureKind::Display) => "desktop",
        }
    }
}

/// ffmpeg arguments selecting and configuring the input device
pub fn input_args(
    platform: CapturePlatform,
    kind: CaptureKind,
    constraints: &MediaConstraints,
) -> Vec<String> {
    let device = constraints
        .device
        .clone()
        .unwrap_or_else(|| platform.default_device(kind).to_string());
    let framerate = constraints.framerate.to_string();
    let size = constraints.resolution.to_string();

    let mut args: Vec<String> = Vec::new();
    match (platform, kind) {
        (CapturePlatform::Linux, CaptureKind::Camera) => {
            args.extend(["-f", "v4l2", "-framerate"].map(String::from));
            args.push(framerate);
            args.push("-video_size".to_string());
            args.push(size);
            args.push("-i".to_string());
            args.push(device);
        }
        (CapturePlatform::Linux, CaptureKind::Display) => {
            args.extend(["-f", "x11grab", "-framerate"].map(String::from));
            args.push(framerate);
            args.push("-i".to_string());
            args.push(device);
        }
        (CapturePlatform::MacOs, _) => {
            args.extend(["-f", "avfoundation", "-framerate"].map(String::from));
            args.push(framerate);
            if kind == CaptureKind::Camera {
                args.push("-video_size".to_string());
                args.push(size);
            } else {
                args.extend(["-capture_cursor", "1"].map(String::from));
            }
            args.push("-i".to_string());
            // avfoundation takes "<video>:<audio>"; "none" skips audio.
            args.push(format!("{}:none", device));
        }
        (CapturePlatform::Windows, CaptureKind::Camera) => {
            args.extend(["-f", "dshow", "-framerate"].map(String::from));
            args.push(framerate);
            args.push("-video_size".to_string());
            args.push(size);
            args.push("-i".to_string());
            args.push(format!("video={}", device));
        }
        (CapturePlatform::Windows, CaptureKind::Display) => {
            args.extend(["-f", "gdigrab", "-framerate"].map(String::from));
            args.push(framerate);
            args.push("-i".to_string());
            args.push(device);
        }
    }
    args
}

/// ffmpeg arguments writing scaled raw RGBA frames to stdout
pub fn output_args(constraints: &MediaConstraints) -> Vec<String> {
    vec![
        "-an".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgba".to_string(),
        "-s".to_string(),
        constraints.resolution.to_string(),
        "-r".to_string(),
        constraints.framerate.to_string(),
        "-".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linux_camera_args() {
        let args = input_args(
            CapturePlatform::Linux,
            CaptureKind::Camera,
            &MediaConstraints::camera(),
        );
        assert_eq!(
            args,
            vec![
                "-f",
                "v4l2",
                "-framerate",
                "30",
                "-video_size",
                "1280x720",
                "-i",
                "/dev/video0"
            ]
        );
    }

    #[test]
    fn test_explicit_device_wins() {
        let constraints = MediaConstraints::camera().with_device("/dev/video2");
        let args = input_args(CapturePlatform::Linux, CaptureKind::Camera, &constraints);
        assert_eq!(args.last().map(String::as_str), Some("/dev/video2"));

        let constraints = MediaConstraints::camera().with_device("USB Cam");
        let args = input_args(CapturePlatform::Windows, CaptureKind::Camera, &constraints);
        assert_eq!(args.last().map(String::as_str), Some("video=USB Cam"));
    }

    #[test]
    fn test_display_args_per_platform() {
        let constraints = MediaConstraints::display();
        let linux = input_args(CapturePlatform::Linux, CaptureKind::Display, &constraints);
        assert_eq!(&linux[..2], &["-f", "x11grab"]);
        assert_eq!(linux.last().map(String::as_str), Some(":0.0"));

        let mac = input_args(CapturePlatform::MacOs, CaptureKind::Display, &constraints);
        assert!(mac.contains(&"-capture_cursor".to_string()));
        assert_eq!(mac.last().map(String::as_str), Some("Capture screen 0:none"));

        let windows = input_args(CapturePlatform::Windows, CaptureKind::Display, &constraints);
        assert_eq!(&windows[..2], &["-f", "gdigrab"]);
        assert_eq!(windows.last().map(String::as_str), Some("desktop"));
    }

    #[test]
    fn test_output_args_request_rgba() {
        let args = output_args(&MediaConstraints::display());
        let joined = args.join(" ");
        assert_eq!(joined, "-an -f rawvideo -pix_fmt rgba -s 1920x1080 -r 30 -");
    }
}

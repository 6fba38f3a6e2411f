//! Screen capture module
//! Uses `xcap` for cross-platform window enumeration and screenshots.
//! Picks the hinted window, or the first browser window by priority, brings it to the
//! front and captures it; falls back to the primary display when nothing matches.
//! Focusing the window changes the stacking order of the desktop, which is intended.
//! Permissions note: On macOS, grant "Screen & System Audio Recording" permission to the
//! terminal or app bundle in System Settings > Privacy & Security.

use std::time::Instant;

use image::{DynamicImage, GenericImageView, RgbaImage};

use crate::error::{VisionError, VisionResult};

/// Browser title fragments, searched in this order when no hint is given.
pub const COMMON_BROWSERS: [&str; 6] = ["chrome", "firefox", "msedge", "opera", "brave", "vivaldi"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowInfo {
    pub id: u32,
    pub title: String,
}

/// Host desktop capabilities needed by the capturer.
pub trait Desktop {
    /// Visible top-level windows.
    fn windows(&self) -> VisionResult<Vec<WindowInfo>>;
    fn focus(&self, window: &WindowInfo) -> VisionResult<()>;
    fn capture_window(&self, window: &WindowInfo) -> VisionResult<RgbaImage>;
    /// Full primary display.
    fn capture_display(&self) -> VisionResult<RgbaImage>;
}

/// Selects the window to capture. A hint is matched case-insensitively against titles;
/// without a hit (or without a hint) browsers are tried in [`COMMON_BROWSERS`] order.
pub fn find_target_window<'a>(windows: &'a [WindowInfo], hint: Option<&str>) -> Option<&'a WindowInfo> {
    let titled = || windows.iter().filter(|w| !w.title.trim().is_empty());

    if let Some(hint) = hint.map(str::to_lowercase).filter(|h| !h.is_empty()) {
        if let Some(found) = titled().find(|w| w.title.to_lowercase().contains(&hint)) {
            return Some(found);
        }
    }

    COMMON_BROWSERS.iter().find_map(|browser| {
        titled().find(|w| w.title.to_lowercase().contains(browser))
    })
}

/// Captures the target window, or the whole primary display when no window matches and
/// `fallback_to_display` is set.
pub fn capture(
    desktop: &dyn Desktop,
    target_hint: Option<&str>,
    fallback_to_display: bool,
) -> VisionResult<DynamicImage> {
    let start = Instant::now();
    let windows = desktop.windows()?;

    let raw = match find_target_window(&windows, target_hint) {
        Some(window) => {
            tracing::info!(title = %window.title, "capturing window");
            if let Err(e) = desktop.focus(window) {
                tracing::warn!(error = %e, "could not bring window to the front");
            }
            match desktop.capture_window(window) {
                Ok(img) => img,
                Err(e) if fallback_to_display => {
                    tracing::warn!(error = %e, "window capture failed, capturing full screen");
                    desktop.capture_display()?
                }
                Err(e) => return Err(e),
            }
        }
        None if fallback_to_display => {
            tracing::info!("no browser or target window found, capturing full screen");
            desktop.capture_display()?
        }
        None => {
            let wanted = target_hint.unwrap_or("a browser").to_string();
            return Err(VisionError::WindowNotFound(wanted));
        }
    };

    let screenshot = DynamicImage::ImageRgba8(raw);
    if screenshot.dimensions() == (0, 0) {
        return Err(VisionError::DisplayAccessDenied(
            "captured empty screenshot - possible permission issue or no display".into(),
        ));
    }
    tracing::debug!(latency = ?start.elapsed(), size = ?screenshot.dimensions(), "capture done");
    Ok(screenshot)
}

/// Desktop backend for the host platform.
pub fn platform_desktop() -> Box<dyn Desktop> {
    #[cfg(target_os = "linux")]
    {
        Box::new(x11::LinuxDesktop::default())
    }
    #[cfg(windows)]
    {
        Box::new(win32::WindowsDesktop::default())
    }
    #[cfg(not(any(target_os = "linux", windows)))]
    {
        Box::new(XcapDesktop)
    }
}

fn display_error(e: xcap::XCapError) -> VisionError {
    VisionError::DisplayAccessDenied(e.to_string())
}

/// Enumeration and capture through xcap. Focusing is not available through xcap, so
/// this backend leaves the stacking order alone; it is used as-is on macOS and wrapped by
/// the Linux and Windows backends.
#[derive(Clone, Copy, Debug, Default)]
pub struct XcapDesktop;

impl XcapDesktop {
    fn find(&self, window: &WindowInfo) -> VisionResult<xcap::Window> {
        xcap::Window::all()
            .map_err(display_error)?
            .into_iter()
            .find(|w| w.id().ok() == Some(window.id))
            .ok_or_else(|| VisionError::WindowNotFound(window.title.clone()))
    }

    fn primary_monitor(&self) -> VisionResult<xcap::Monitor> {
        let monitors = xcap::Monitor::all().map_err(display_error)?;
        let primary = monitors
            .iter()
            .find(|m| m.is_primary().unwrap_or(false))
            .cloned()
            .or_else(|| monitors.first().cloned());
        primary.ok_or_else(|| VisionError::DisplayAccessDenied("no monitors found".into()))
    }
}

impl Desktop for XcapDesktop {
    fn windows(&self) -> VisionResult<Vec<WindowInfo>> {
        let windows = xcap::Window::all().map_err(display_error)?;
        Ok(windows
            .into_iter()
            .filter(|w| !w.is_minimized().unwrap_or(true))
            .filter_map(|w| {
                let id = w.id().ok()?;
                let title = w.title().ok()?;
                (!title.trim().is_empty()).then_some(WindowInfo { id, title })
            })
            .collect())
    }

    fn focus(&self, window: &WindowInfo) -> VisionResult<()> {
        tracing::debug!(title = %window.title, "window focus not supported on this platform");
        Ok(())
    }

    fn capture_window(&self, window: &WindowInfo) -> VisionResult<RgbaImage> {
        self.find(window)?.capture_image().map_err(display_error)
    }

    fn capture_display(&self) -> VisionResult<RgbaImage> {
        self.primary_monitor()?.capture_image().map_err(display_error)
    }
}

/// Windows backend: xcap for pixels, Win32 for raising the window.
#[cfg(windows)]
mod win32 {
    use std::time::Duration;

    use image::RgbaImage;
    use windows::Win32::Foundation::HWND;
    use windows::Win32::UI::WindowsAndMessaging::{IsIconic, SW_RESTORE, SetForegroundWindow, ShowWindow};

    use super::{Desktop, WindowInfo, XcapDesktop};
    use crate::error::{VisionError, VisionResult};

    #[derive(Debug, Default)]
    pub struct WindowsDesktop {
        inner: XcapDesktop,
    }

    fn hwnd(id: u32) -> HWND {
        HWND(id as usize as *mut std::ffi::c_void)
    }

    impl Desktop for WindowsDesktop {
        fn windows(&self) -> VisionResult<Vec<WindowInfo>> {
            self.inner.windows()
        }

        fn focus(&self, window: &WindowInfo) -> VisionResult<()> {
            let hwnd = hwnd(window.id);
            let raised = unsafe {
                if IsIconic(hwnd).as_bool() {
                    let _ = ShowWindow(hwnd, SW_RESTORE);
                }
                SetForegroundWindow(hwnd).as_bool()
            };
            if !raised {
                return Err(VisionError::WindowNotFound(window.title.clone()));
            }
            // let the window repaint before it is captured
            std::thread::sleep(Duration::from_millis(100));
            Ok(())
        }

        fn capture_window(&self, window: &WindowInfo) -> VisionResult<RgbaImage> {
            self.inner.capture_window(window)
        }

        fn capture_display(&self) -> VisionResult<RgbaImage> {
            self.inner.capture_display()
        }
    }

}

/// Linux window helpers. `xdotool` and `wmctrl` are optional command-line tools; each
/// invocation is bounded by a short timeout so a misbehaving tool cannot hang a capture.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
mod x11 {
    use std::io::Read;
    use std::process::{Command, Stdio};
    use std::thread;
    use std::time::{Duration, Instant};

    use image::{imageops, RgbaImage};

    use super::{Desktop, WindowInfo, XcapDesktop};
    use crate::error::{VisionError, VisionResult};

    const PROBE_TIMEOUT: Duration = Duration::from_secs(1);
    const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct WindowGeometry {
        pub x: i32,
        pub y: i32,
        pub width: u32,
        pub height: u32,
    }

    /// Runs a helper and returns its stdout when it exits successfully before `timeout`.
    /// Stdout is drained on a separate thread so a chatty helper cannot fill the pipe.
    pub fn run_helper(program: &str, args: &[&str], timeout: Duration) -> Option<String> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .ok()?;
        let mut stdout = child.stdout.take()?;
        let reader = thread::spawn(move || {
            let mut out = String::new();
            stdout.read_to_string(&mut out).map(|_| out)
        });

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    tracing::warn!(program, "helper timed out, killing it");
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                Ok(None) => thread::sleep(Duration::from_millis(10)),
                Err(_) => return None,
            }
        };
        let out = reader.join().ok()?.ok()?;
        status.success().then_some(out)
    }

    /// Parses `xdotool getwindowgeometry --shell <id>` output.
    pub fn parse_xdotool_shell(out: &str) -> Option<WindowGeometry> {
        let mut x = None;
        let mut y = None;
        let mut width = None;
        let mut height = None;
        for line in out.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            match key {
                "X" => x = value.parse().ok(),
                "Y" => y = value.parse().ok(),
                "WIDTH" => width = value.parse().ok(),
                "HEIGHT" => height = value.parse().ok(),
                _ => {}
            }
        }
        Some(WindowGeometry { x: x?, y: y?, width: width?, height: height? })
    }

    /// Parses `wmctrl -lG` output: `0x01234567  0 x y w h host title...`.
    pub fn parse_wmctrl_geometry(out: &str, id: u32) -> Option<WindowGeometry> {
        out.lines().find_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 7 {
                return None;
            }
            let line_id = u32::from_str_radix(parts[0].trim_start_matches("0x"), 16).ok()?;
            if line_id != id {
                return None;
            }
            Some(WindowGeometry {
                x: parts[2].parse().ok()?,
                y: parts[3].parse().ok()?,
                width: parts[4].parse().ok()?,
                height: parts[5].parse().ok()?,
            })
        })
    }

    /// Crops a display capture to a window rectangle, clamped to the capture bounds.
    pub fn crop_to_geometry(display: &RgbaImage, geometry: WindowGeometry) -> Option<RgbaImage> {
        let x = geometry.x.max(0) as u32;
        let y = geometry.y.max(0) as u32;
        if x >= display.width() || y >= display.height() {
            return None;
        }
        let width = geometry.width.min(display.width() - x);
        let height = geometry.height.min(display.height() - y);
        if width == 0 || height == 0 {
            return None;
        }
        Some(imageops::crop_imm(display, x, y, width, height).to_image())
    }

    fn window_arg(id: u32) -> String {
        format!("0x{id:08x}")
    }

    #[derive(Clone, Copy, Debug, Default)]
    pub struct HelperTools {
        pub xdotool: bool,
        pub wmctrl: bool,
    }

    impl HelperTools {
        pub fn detect() -> Self {
            let tools = Self {
                xdotool: run_helper("xdotool", &["--version"], PROBE_TIMEOUT).is_some(),
                wmctrl: run_helper("wmctrl", &["-m"], PROBE_TIMEOUT).is_some(),
            };
            if !tools.xdotool && !tools.wmctrl {
                tracing::warn!(
                    "neither xdotool nor wmctrl is installed; install one of them to capture \
                     specific windows (sudo apt-get install xdotool wmctrl)"
                );
            }
            tools
        }
    }

    #[derive(Debug, Default)]
    pub struct LinuxDesktop {
        inner: XcapDesktop,
        tools: std::sync::OnceLock<HelperTools>,
    }

    impl LinuxDesktop {
        fn tools(&self) -> HelperTools {
            *self.tools.get_or_init(HelperTools::detect)
        }

        fn geometry(&self, window: &WindowInfo) -> Option<WindowGeometry> {
            let tools = self.tools();
            let id = window.id.to_string();
            if tools.xdotool {
                let out = run_helper("xdotool", &["getwindowgeometry", "--shell", &id], QUERY_TIMEOUT);
                if let Some(geometry) = out.as_deref().and_then(parse_xdotool_shell) {
                    return Some(geometry);
                }
                tracing::debug!("xdotool gave no geometry, trying wmctrl");
            }
            if tools.wmctrl {
                let out = run_helper("wmctrl", &["-lG"], QUERY_TIMEOUT)?;
                return parse_wmctrl_geometry(&out, window.id);
            }
            None
        }
    }

    impl Desktop for LinuxDesktop {
        fn windows(&self) -> VisionResult<Vec<WindowInfo>> {
            self.inner.windows()
        }

        fn focus(&self, window: &WindowInfo) -> VisionResult<()> {
            let tools = self.tools();
            let activated = if tools.wmctrl {
                run_helper("wmctrl", &["-i", "-a", &window_arg(window.id)], PROBE_TIMEOUT).is_some()
            } else if tools.xdotool {
                run_helper("xdotool", &["windowactivate", &window.id.to_string()], PROBE_TIMEOUT)
                    .is_some()
            } else {
                false
            };
            if activated {
                Ok(())
            } else {
                Err(VisionError::WindowNotFound(window.title.clone()))
            }
        }

        fn capture_window(&self, window: &WindowInfo) -> VisionResult<RgbaImage> {
            match self.inner.capture_window(window) {
                Ok(img) => Ok(img),
                Err(e) => {
                    tracing::debug!(error = %e, "direct window capture failed, cropping display");
                    let geometry = self.geometry(window).ok_or(e)?;
                    let display = self.inner.capture_display()?;
                    crop_to_geometry(&display, geometry).ok_or_else(|| {
                        VisionError::DisplayAccessDenied(format!(
                            "window geometry {geometry:?} lies outside the display"
                        ))
                    })
                }
            }
        }

        fn capture_display(&self) -> VisionResult<RgbaImage> {
            self.inner.capture_display()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn parses_xdotool_shell_output() {
            let out = "WINDOW=123\nX=10\nY=20\nWIDTH=800\nHEIGHT=600\nSCREEN=0\n";
            assert_eq!(
                parse_xdotool_shell(out),
                Some(WindowGeometry { x: 10, y: 20, width: 800, height: 600 })
            );
            assert_eq!(parse_xdotool_shell("X=1\nY=2\n"), None);
        }

        #[test]
        fn parses_wmctrl_line_for_matching_id() {
            let out = "0x01e00003  0 0    0    1920 1080 host Desktop\n\
                       0x03a00007  0 100  50   1280 720  host Lichess - Mozilla Firefox\n";
            assert_eq!(
                parse_wmctrl_geometry(out, 0x03a0_0007),
                Some(WindowGeometry { x: 100, y: 50, width: 1280, height: 720 })
            );
            assert_eq!(parse_wmctrl_geometry(out, 0x1234), None);
        }

        #[test]
        fn crop_is_clamped_to_display() {
            let display = RgbaImage::new(100, 80);
            let geometry = WindowGeometry { x: 60, y: -10, width: 100, height: 50 };
            let cropped = crop_to_geometry(&display, geometry).unwrap();
            assert_eq!(cropped.dimensions(), (40, 50));
            let outside = WindowGeometry { x: 200, y: 0, width: 10, height: 10 };
            assert!(crop_to_geometry(&display, outside).is_none());
        }

        #[cfg(unix)]
        #[test]
        fn large_helper_output_is_read_in_full() {
            // 200 KB is several pipe buffers
            let out = run_helper("sh", &["-c", "head -c 204800 /dev/zero | tr '\\0' x"], QUERY_TIMEOUT)
                .expect("helper output");
            assert_eq!(out.len(), 204_800);
        }

        #[cfg(unix)]
        #[test]
        fn slow_helper_is_killed() {
            let start = Instant::now();
            assert!(run_helper("sleep", &["5"], Duration::from_millis(200)).is_none());
            assert!(start.elapsed() < Duration::from_secs(3));
        }

        #[test]
        fn missing_helper_yields_none() {
            assert!(run_helper("definitely-not-a-real-helper", &[], PROBE_TIMEOUT).is_none());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FakeDesktop {
        windows: Vec<WindowInfo>,
        focused: RefCell<Vec<u32>>,
        fail_window_capture: bool,
    }

    impl FakeDesktop {
        fn new(titles: &[&str]) -> Self {
            Self {
                windows: titles
                    .iter()
                    .enumerate()
                    .map(|(i, t)| WindowInfo { id: i as u32 + 1, title: t.to_string() })
                    .collect(),
                focused: RefCell::new(Vec::new()),
                fail_window_capture: false,
            }
        }
    }

    impl Desktop for FakeDesktop {
        fn windows(&self) -> VisionResult<Vec<WindowInfo>> {
            Ok(self.windows.clone())
        }

        fn focus(&self, window: &WindowInfo) -> VisionResult<()> {
            self.focused.borrow_mut().push(window.id);
            Ok(())
        }

        fn capture_window(&self, window: &WindowInfo) -> VisionResult<RgbaImage> {
            if self.fail_window_capture {
                return Err(VisionError::DisplayAccessDenied("denied".into()));
            }
            Ok(RgbaImage::new(window.id * 10, window.id * 10))
        }

        fn capture_display(&self) -> VisionResult<RgbaImage> {
            Ok(RgbaImage::new(1920, 1080))
        }
    }

    fn infos(titles: &[&str]) -> Vec<WindowInfo> {
        FakeDesktop::new(titles).windows
    }

    #[test]
    fn hint_matches_case_insensitively() {
        let windows = infos(&["Terminal", "Discord - #chess", "Google Chrome"]);
        let found = find_target_window(&windows, Some("DISCORD")).unwrap();
        assert_eq!(found.id, 2);
    }

    #[test]
    fn browsers_follow_priority_order() {
        // firefox appears first in the list, but chrome ranks higher
        let windows = infos(&["Mozilla Firefox", "Lichess - Google Chrome"]);
        assert_eq!(find_target_window(&windows, None).unwrap().id, 2);
    }

    #[test]
    fn unknown_hint_falls_back_to_browsers() {
        let windows = infos(&["Brave", "Editor"]);
        assert_eq!(find_target_window(&windows, Some("slack")).unwrap().id, 1);
    }

    #[test]
    fn empty_titles_are_ignored() {
        let windows = infos(&["", "   "]);
        assert!(find_target_window(&windows, Some("")).is_none());
    }

    #[test]
    fn capture_focuses_and_grabs_selected_window() {
        let desktop = FakeDesktop::new(&["Notes", "chess.com - Opera"]);
        let img = capture(&desktop, None, true).unwrap();
        assert_eq!(img.dimensions(), (20, 20));
        assert_eq!(*desktop.focused.borrow(), vec![2]);
    }

    #[test]
    fn no_match_falls_back_to_display() {
        let desktop = FakeDesktop::new(&["Notes"]);
        let img = capture(&desktop, None, true).unwrap();
        assert_eq!(img.dimensions(), (1920, 1080));
        assert!(desktop.focused.borrow().is_empty());
    }

    #[test]
    fn no_match_without_fallback_is_window_not_found() {
        let desktop = FakeDesktop::new(&["Notes"]);
        let err = capture(&desktop, Some("lichess"), false).unwrap_err();
        assert!(matches!(err, VisionError::WindowNotFound(ref t) if t == "lichess"));
    }

    #[test]
    fn failed_window_capture_uses_display() {
        let mut desktop = FakeDesktop::new(&["Firefox"]);
        desktop.fail_window_capture = true;
        let img = capture(&desktop, None, true).unwrap();
        assert_eq!(img.dimensions(), (1920, 1080));
    }

    #[test]
    #[ignore = "requires graphical display and screen recording permissions"]
    fn test_capture_dimensions() {
        let desktop = platform_desktop();
        let img = capture(desktop.as_ref(), None, true).expect("capture failed");
        let (w, h) = img.dimensions();
        assert!(w > 0 && h > 0, "captured image has invalid dimensions {}x{}", w, h);
    }
}

//! Capture task lifecycle.
//!
//! The capture loop runs on its own OS thread because reading frames blocks.
//! Each frame is driven through the async [`Detector`] on the server's
//! runtime via [`Handle::block_on`], one at a time.

use crate::pipeline::Detector;
use reporter_capture::{select_interface, CaptureBackend, CaptureError, FrameSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;

/// Reasons [`CaptureController::start`] refused or failed to start capture.
#[derive(Debug, Error)]
pub enum StartError {
    /// A capture task is already running.
    #[error("capture is already running")]
    AlreadyRunning,

    /// Interface selection or opening the capture device failed.
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// The capture thread could not be spawned.
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Clears the running flag when the capture thread exits, however it exits.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Starts and tracks the single capture task.
pub struct CaptureController {
    backend: Arc<dyn CaptureBackend>,
    detector: Arc<Detector>,
    interface: Option<String>,
    runtime: Handle,
    running: Arc<AtomicBool>,
}

impl CaptureController {
    /// Creates a controller.
    ///
    /// `interface` pins the capture device; when `None` one is chosen with
    /// [`select_interface`] at every start.
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        detector: Arc<Detector>,
        interface: Option<String>,
        runtime: Handle,
    ) -> Self {
        Self {
            backend,
            detector,
            interface,
            runtime,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn detector(&self) -> &Arc<Detector> {
        &self.detector
    }

    /// Returns `true` while a capture task is alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Resets the detection ledger.
    pub fn clear(&self) {
        self.detector.ledger().clear();
    }

    /// Opens the capture device and starts the capture task.
    ///
    /// Blocks while the device opens, so call it off the async executor.
    /// Returns the interface being captured.
    ///
    /// # Errors
    ///
    /// - [`StartError::AlreadyRunning`] if a capture task is alive.
    /// - [`StartError::Capture`] if no interface qualifies or the device
    ///   cannot be opened. There is no retry; call `start` again.
    /// - [`StartError::Spawn`] if the capture thread cannot be created.
    pub fn start(&self) -> Result<String, StartError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StartError::AlreadyRunning);
        }
        let guard = RunningGuard(Arc::clone(&self.running));

        let interface = self.resolve_interface()?;
        let source = self
            .backend
            .open(&interface, self.detector.filter())
            .inspect_err(|e| {
                tracing::error!(interface = %interface, error = %e, "failed to open capture");
            })?;

        let detector = Arc::clone(&self.detector);
        let runtime = self.runtime.clone();
        let thread_interface = interface.clone();
        std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                let _guard = guard;
                run_capture(source, &detector, &runtime, &thread_interface);
            })?;

        tracing::info!(
            interface = %interface,
            filter = %self.detector.filter(),
            "capture started"
        );
        Ok(interface)
    }

    fn resolve_interface(&self) -> Result<String, CaptureError> {
        if let Some(interface) = &self.interface {
            return Ok(interface.clone());
        }
        let interfaces = self.backend.interfaces()?;
        let selected = select_interface(&interfaces).inspect_err(|_| {
            tracing::error!(
                candidates = interfaces.len(),
                "no interface with a non-loopback IPv4 address"
            );
        })?;
        tracing::info!(interface = %selected, "selected capture interface");
        Ok(selected)
    }
}

fn run_capture(
    mut source: Box<dyn FrameSource>,
    detector: &Detector,
    runtime: &Handle,
    interface: &str,
) {
    let mut frames: u64 = 0;
    loop {
        match source.next_frame() {
            Ok(Some(frame)) => {
                frames += 1;
                runtime.block_on(detector.handle_frame(&frame));
            }
            Ok(None) => {
                tracing::info!(interface, frames, "capture source closed");
                break;
            }
            Err(e) => {
                tracing::error!(interface, frames, error = %e, "capture failed; stopping");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Broadcaster;
    use crate::ledger::Ledger;
    use reporter_capture::{CaptureFilter, InterfaceInfo, ReplaySource};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Backend whose sources replay a fixed frame list.
    struct ScriptedBackend {
        interfaces: Vec<InterfaceInfo>,
        frames: Vec<Vec<u8>>,
        fail_open: bool,
    }

    impl ScriptedBackend {
        fn new(interfaces: Vec<InterfaceInfo>, frames: Vec<Vec<u8>>) -> Self {
            Self {
                interfaces,
                frames,
                fail_open: false,
            }
        }
    }

    impl CaptureBackend for ScriptedBackend {
        fn interfaces(&self) -> Result<Vec<InterfaceInfo>, CaptureError> {
            Ok(self.interfaces.clone())
        }

        fn open(
            &self,
            interface: &str,
            _filter: &CaptureFilter,
        ) -> Result<Box<dyn FrameSource>, CaptureError> {
            if self.fail_open {
                return Err(CaptureError::Open {
                    interface: interface.to_string(),
                    reason: "permission denied".to_string(),
                });
            }
            Ok(Box::new(ReplaySource::new(self.frames.clone())))
        }
    }

    /// Source fed by a channel; closes when the sender is dropped.
    struct GatedSource(std::sync::mpsc::Receiver<Vec<u8>>);

    impl FrameSource for GatedSource {
        fn next_frame(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
            Ok(self.0.recv().ok())
        }
    }

    struct GatedBackend(Mutex<Option<std::sync::mpsc::Receiver<Vec<u8>>>>);

    impl CaptureBackend for GatedBackend {
        fn interfaces(&self) -> Result<Vec<InterfaceInfo>, CaptureError> {
            Ok(lan())
        }

        fn open(
            &self,
            interface: &str,
            _filter: &CaptureFilter,
        ) -> Result<Box<dyn FrameSource>, CaptureError> {
            let rx = self.0.lock().unwrap().take().ok_or_else(|| CaptureError::Open {
                interface: interface.to_string(),
                reason: "device busy".to_string(),
            })?;
            Ok(Box::new(GatedSource(rx)))
        }
    }

    fn frame(last: u8, dport: u16) -> Vec<u8> {
        let mut f = vec![0xff; 6];
        f.extend_from_slice(&[0x02, 0, 0, 0, 0, last]);
        f.extend_from_slice(&[0x08, 0x00]);
        f.extend_from_slice(&[0x45, 0, 0, 28, 0, 0, 0, 0, 64, 17, 0, 0]);
        f.extend_from_slice(&[10, 0, 0, last]);
        f.extend_from_slice(&[10, 0, 0, 255]);
        f.extend_from_slice(&1000u16.to_be_bytes());
        f.extend_from_slice(&dport.to_be_bytes());
        f.extend_from_slice(&[0, 8, 0, 0]);
        f
    }

    fn lan() -> Vec<InterfaceInfo> {
        vec![
            InterfaceInfo::new("lo", vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]),
            InterfaceInfo::new("eth0", vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2))]),
        ]
    }

    fn controller(
        backend: impl CaptureBackend + 'static,
        interface: Option<String>,
    ) -> CaptureController {
        let detector = Arc::new(Detector::new(
            CaptureFilter::default(),
            Arc::new(Ledger::new()),
            None,
            Broadcaster::new(Duration::from_secs(1), 16),
        ));
        CaptureController::new(Arc::new(backend), detector, interface, Handle::current())
    }

    async fn wait_until_stopped(controller: &CaptureController) {
        for _ in 0..200 {
            if !controller.is_running() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("capture task did not finish");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_selects_interface_and_publishes_new_senders() {
        let backend = ScriptedBackend::new(
            lan(),
            vec![frame(5, 8888), frame(5, 14235), frame(6, 12345), frame(5, 8888)],
        );
        let controller = controller(backend, None);
        let mut subscriber = controller.detector().broadcaster().subscribe();

        let interface = controller.start().unwrap();
        assert_eq!(interface, "eth0");

        let first: serde_json::Value =
            serde_json::from_str(&subscriber.recv().await.unwrap()).unwrap();
        let second: serde_json::Value =
            serde_json::from_str(&subscriber.recv().await.unwrap()).unwrap();
        assert_eq!(first["id"], 1);
        assert_eq!(first["ip_src"], "10.0.0.5");
        assert_eq!(second["id"], 2);
        assert_eq!(second["ip_src"], "10.0.0.6");

        wait_until_stopped(&controller).await;
        assert!(subscriber.try_recv().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn second_start_while_running_is_rejected() {
        let (tx, rx) = std::sync::mpsc::channel();
        let controller = controller(GatedBackend(Mutex::new(Some(rx))), None);
        let mut subscriber = controller.detector().broadcaster().subscribe();

        controller.start().unwrap();
        assert!(controller.is_running());
        assert!(matches!(controller.start(), Err(StartError::AlreadyRunning)));

        tx.send(frame(9, 60040)).unwrap();
        let event: serde_json::Value =
            serde_json::from_str(&subscriber.recv().await.unwrap()).unwrap();
        assert_eq!(event["port"], 60040);

        drop(tx);
        wait_until_stopped(&controller).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn configured_interface_skips_selection() {
        let backend = ScriptedBackend::new(Vec::new(), Vec::new());
        let controller = controller(backend, Some("en0".to_string()));

        assert_eq!(controller.start().unwrap(), "en0");
        wait_until_stopped(&controller).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn no_interface_is_reported_and_start_can_be_retried() {
        let backend = ScriptedBackend::new(
            vec![InterfaceInfo::new("lo", vec![IpAddr::V4(Ipv4Addr::LOCALHOST)])],
            Vec::new(),
        );
        let controller = controller(backend, None);

        assert!(matches!(
            controller.start(),
            Err(StartError::Capture(CaptureError::NoInterfaceFound))
        ));
        assert!(!controller.is_running());
        assert!(matches!(
            controller.start(),
            Err(StartError::Capture(CaptureError::NoInterfaceFound))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn open_failure_is_reported_and_clears_running_flag() {
        let mut backend = ScriptedBackend::new(lan(), Vec::new());
        backend.fail_open = true;
        let controller = controller(backend, None);

        assert!(matches!(
            controller.start(),
            Err(StartError::Capture(CaptureError::Open { .. }))
        ));
        assert!(!controller.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn clear_resets_ids_between_captures() {
        let backend = ScriptedBackend::new(lan(), vec![frame(7, 8888)]);
        let controller = controller(backend, None);
        let mut subscriber = controller.detector().broadcaster().subscribe();

        controller.start().unwrap();
        wait_until_stopped(&controller).await;
        controller.clear();
        controller.start().unwrap();
        wait_until_stopped(&controller).await;

        for _ in 0..2 {
            let event: serde_json::Value =
                serde_json::from_str(&subscriber.recv().await.unwrap()).unwrap();
            assert_eq!(event["id"], 1);
            assert_eq!(event["ip_src"], "10.0.0.7");
        }
    }
}

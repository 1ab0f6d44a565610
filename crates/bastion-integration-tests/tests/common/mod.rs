//! Shared harness for integration tests.

use std::time::Duration;

use bastion_core::ModuleId;
use bastion_runtime::{Hook, ModuleManager, NativeRegistry};
use bastion_test::{CallLog, EchoModule, ManifestBuilder, RecordingModule, scratch_dir, test_manager};

/// How long to wait for mailbox deliveries.
#[allow(dead_code)]
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// A manager with a fixed set of native symbols, all recording into `log`.
///
/// | symbol        | behaviour                      |
/// |---------------|--------------------------------|
/// | `recorder`    | every hook succeeds            |
/// | `bad-start`   | `start` fails                  |
/// | `bad-event`   | `on_event` fails               |
/// | `slow-start`  | `start` never returns          |
/// | `echo`        | republishes events to `echoes` |
#[allow(dead_code)]
pub struct Harness {
    /// The manager under test.
    pub manager: ModuleManager,
    /// Calls made into every recording module.
    pub log: CallLog,
}

#[allow(dead_code)]
impl Harness {
    pub fn new() -> Self {
        bastion_test::init_test_logging();
        let log = CallLog::new();
        let natives = NativeRegistry::new();
        let symbols = [
            ("recorder", None, None),
            ("bad-start", Some(Hook::Start), None),
            ("bad-event", Some(Hook::OnEvent), None),
            ("slow-start", None, Some(Hook::Start)),
        ];
        for (symbol, fail_on, hang_on) in symbols {
            let log = log.clone();
            natives.register(symbol, move || {
                let mut module = RecordingModule::new(log.clone());
                if let Some(hook) = fail_on {
                    module = module.failing(hook);
                }
                if let Some(hook) = hang_on {
                    module = module.hanging(hook);
                }
                module
            });
        }
        let echo_log = log.clone();
        natives.register("echo", move || EchoModule::new("echoes", echo_log.clone()));

        Self {
            manager: test_manager(natives),
            log,
        }
    }

    /// Catalog a native module declaring `events`.
    pub fn register(&self, id: &str, symbol: &str, events: &[&str]) -> ModuleId {
        let manifest = events
            .iter()
            .fold(ManifestBuilder::native(id, symbol), |b, e| b.event(e))
            .build();
        self.manager.register_manifest(manifest, scratch_dir());
        ModuleId::new(id).unwrap()
    }

    /// Catalog, load and start a module.
    pub async fn running(&self, id: &str, symbol: &str, events: &[&str]) -> ModuleId {
        let id = self.register(id, symbol, events);
        self.manager.load(&id).await.unwrap();
        self.manager.start(&id).await.unwrap();
        id
    }
}

//! End-to-end scenarios exercising the assembled `Host`: every component
//! wired together the way `kernel::host::Host::start` does it, rather
//! than a single module in isolation. Mirrors the walkthroughs in §8.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use pluginhost_core::kernel::{Host, HostConfig};
use pluginhost_core::plugin_system::context::PluginContext;
use pluginhost_core::plugin_system::loader::RegistryPluginLoader;
use pluginhost_core::plugin_system::traits::{Plugin, PluginError, PluginState};
use pluginhost_core::plugin_system::PluginRegistry;
use pluginhost_core::storage::config_store::ConfigStoreConfig;
use pluginhost_core::plugin_system::supervisor::SupervisorConfig;
use pluginhost_core::event::bus::EventBusConfig;

/// A plugin whose `start` fails a fixed number of times before
/// succeeding, to drive the Supervisor's restart path.
struct FlakyStart {
    remaining_failures: AtomicU32,
}

#[async_trait]
impl Plugin for FlakyStart {
    fn name(&self) -> &str {
        "flaky-start"
    }
    fn version(&self) -> &str {
        "1.0.0"
    }
    async fn init(&self, _ctx: PluginContext) -> Result<(), PluginError> {
        Ok(())
    }
    async fn start(&self) -> Result<(), PluginError> {
        if self.remaining_failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            if n > 0 {
                Some(n - 1)
            } else {
                None
            }
        }).is_ok()
        {
            Err(PluginError::new("simulated crash on start"))
        } else {
            Ok(())
        }
    }
    async fn stop(&self) -> Result<(), PluginError> {
        Ok(())
    }
    async fn destroy(&self) {}
    fn state(&self) -> PluginState {
        PluginState::Loaded
    }
}

/// A plugin that always fails `start`, for the give-up-after-max-retries
/// scenario.
struct AlwaysFailsStart;

#[async_trait]
impl Plugin for AlwaysFailsStart {
    fn name(&self) -> &str {
        "always-fails"
    }
    fn version(&self) -> &str {
        "1.0.0"
    }
    async fn init(&self, _ctx: PluginContext) -> Result<(), PluginError> {
        Ok(())
    }
    async fn start(&self) -> Result<(), PluginError> {
        Err(PluginError::new("always crashes"))
    }
    async fn stop(&self) -> Result<(), PluginError> {
        Ok(())
    }
    async fn destroy(&self) {}
    fn state(&self) -> PluginState {
        PluginState::Loaded
    }
}

/// A plugin that records how many times `init` has run, so config-change
/// reconciliation (which re-inits then re-starts) is observable.
struct ReinitCounter {
    init_count: Arc<AtomicU32>,
}

#[async_trait]
impl Plugin for ReinitCounter {
    fn name(&self) -> &str {
        "reinit-counter"
    }
    fn version(&self) -> &str {
        "1.0.0"
    }
    async fn init(&self, _ctx: PluginContext) -> Result<(), PluginError> {
        self.init_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn start(&self) -> Result<(), PluginError> {
        Ok(())
    }
    async fn stop(&self) -> Result<(), PluginError> {
        Ok(())
    }
    async fn destroy(&self) {}
    fn state(&self) -> PluginState {
        PluginState::Loaded
    }
}

fn fast_host_config() -> HostConfig {
    HostConfig {
        event_bus: EventBusConfig::default(),
        supervisor: SupervisorConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(15),
            max_backoff: Duration::from_millis(50),
            ..SupervisorConfig::default()
        },
        config_store: ConfigStoreConfig {
            poll_interval: Duration::from_millis(20),
            staleness_window: Duration::from_millis(5),
        },
    }
}

#[tokio::test]
async fn happy_path_install_init_start_stop_unload() {
    let dir = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryPluginLoader::new());
    loader.register(
        "mem://reinit",
        "ReinitCounter",
        Arc::new(|| {
            Box::new(ReinitCounter {
                init_count: Arc::new(AtomicU32::new(0)),
            }) as Box<dyn Plugin>
        }),
    );

    let host = Host::with_config(dir.path(), loader, fast_host_config());
    host.start().await.expect("host starts");

    let registry = host.registry();
    registry.install("p1", "mem://reinit", "ReinitCounter").await.expect("install");
    assert_eq!(registry.state("p1").await, Some(PluginState::Loaded));

    registry.init("p1").await.expect("init");
    assert_eq!(registry.state("p1").await, Some(PluginState::Initialized));

    registry.start("p1").await.expect("start");
    assert_eq!(registry.state("p1").await, Some(PluginState::Started));

    registry.stop("p1").await.expect("stop");
    assert_eq!(registry.state("p1").await, Some(PluginState::Stopped));

    registry.unload("p1").await;
    assert_eq!(registry.state("p1").await, None);

    let aggregate = host.metrics().aggregate();
    assert_eq!(aggregate.installs, 1);
    assert_eq!(aggregate.starts, 1);
    assert_eq!(aggregate.stops, 1);
    assert_eq!(aggregate.unloads, 1);

    host.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn crash_on_start_recovers_via_supervised_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryPluginLoader::new());
    loader.register(
        "mem://flaky",
        "FlakyStart",
        Arc::new(|| {
            Box::new(FlakyStart {
                remaining_failures: AtomicU32::new(1),
            }) as Box<dyn Plugin>
        }),
    );

    let host = Host::with_config(dir.path(), loader, fast_host_config());
    host.start().await.expect("host starts");

    let registry = host.registry();
    registry.install("p1", "mem://flaky", "FlakyStart").await.expect("install");
    registry.init("p1").await.expect("init");

    let err = registry.start("p1").await.unwrap_err();
    assert!(matches!(err, pluginhost_core::plugin_system::PluginSystemError::LifecycleFault { .. }));
    assert_eq!(registry.state("p1").await, Some(PluginState::Failed));

    // Supervisor's scheduled retry (after the backoff) re-enters through
    // the restart callback wired in `Host::start`, which calls back into
    // `Registry::recover`, re-running init then start on the same plugin.
    sleep(Duration::from_millis(200)).await;
    assert_eq!(registry.state("p1").await, Some(PluginState::Started));
    assert_eq!(host.supervisor().failure_count("p1").await, Some(0));

    host.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn repeated_crashes_give_up_after_max_retries() {
    let dir = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryPluginLoader::new());
    loader.register("mem://always-fails", "AlwaysFailsStart", Arc::new(|| Box::new(AlwaysFailsStart) as Box<dyn Plugin>));

    let mut config = fast_host_config();
    config.supervisor.max_retries = 1;

    let host = Host::with_config(dir.path(), loader, config);

    let gave_up = Arc::new(AtomicBool::new(false));
    let flag = gave_up.clone();
    host.supervisor()
        .set_alert_callback(move |_name, _count| {
            let flag = flag.clone();
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
            })
        })
        .await;

    host.start().await.expect("host starts");

    let registry = host.registry();
    registry.install("p1", "mem://always-fails", "AlwaysFailsStart").await.expect("install");
    registry.init("p1").await.expect("init");
    let _ = registry.start("p1").await;

    // First failure schedules one retry (max_retries == 1); that retry
    // also fails, pushing the counter past the budget and firing the
    // alert callback instead of scheduling a third attempt.
    sleep(Duration::from_millis(300)).await;
    assert!(gave_up.load(Ordering::SeqCst), "alert callback should fire once retries are exhausted");
    assert_eq!(registry.state("p1").await, Some(PluginState::Failed));

    host.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn external_config_edit_triggers_reconcile_and_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryPluginLoader::new());
    let init_count = Arc::new(AtomicU32::new(0));
    let counted = init_count.clone();
    loader.register(
        "mem://reinit",
        "ReinitCounter",
        Arc::new(move || {
            Box::new(ReinitCounter {
                init_count: counted.clone(),
            }) as Box<dyn Plugin>
        }),
    );

    let host = Host::with_config(dir.path(), loader, fast_host_config());
    host.start().await.expect("host starts");

    let registry = host.registry();
    registry.install("p1", "mem://reinit", "ReinitCounter").await.expect("install");
    registry.init("p1").await.expect("init");
    registry.start("p1").await.expect("start");
    assert_eq!(init_count.load(Ordering::SeqCst), 1);

    // Write the config file directly, bypassing `set_config`, to
    // simulate an operator editing it outside the host.
    let config_path = dir.path().join(pluginhost_core::kernel::constants::CONFIG_DIR_NAME).join("p1.json");
    let mut values = HashMap::new();
    values.insert("greeting".to_string(), "hello".to_string());
    tokio::fs::write(&config_path, serde_json::to_vec(&values).unwrap()).await.expect("write config");

    // Poll interval (20ms) + staleness window (5ms) must both elapse
    // before the poller acts on the new mtime.
    sleep(Duration::from_millis(200)).await;

    assert_eq!(registry.state("p1").await, Some(PluginState::Started));
    assert!(init_count.load(Ordering::SeqCst) >= 2, "reconcile should have re-initialized the plugin");

    host.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn event_dispatch_with_failing_handler_dead_letters_without_blocking_others() {
    let dir = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryPluginLoader::new());
    let host = Host::with_config(dir.path(), loader, fast_host_config());
    host.start().await.expect("host starts");

    let bus = host.event_bus();
    let good_received = Arc::new(AtomicU32::new(0));
    let g = good_received.clone();
    bus.subscribe(
        "Ping",
        Arc::new(move |_e| {
            let g = g.clone();
            Box::pin(async move {
                g.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }),
    )
    .await;
    bus.subscribe(
        "Ping",
        Arc::new(|_e| Box::pin(async move { Err("handler blew up".to_string()) })),
    )
    .await;

    bus.publish(pluginhost_core::event::Event::new("Ping", "test")).await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(good_received.load(Ordering::SeqCst), 1);
    assert_eq!(bus.dlq_size().await, 1);
    assert_eq!(bus.total_dispatched(), 2);
    assert_eq!(bus.total_failed(), 1);

    host.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn replay_republishes_persisted_events_to_a_new_subscriber() {
    let dir = tempfile::tempdir().expect("tempdir");
    let loader = Arc::new(RegistryPluginLoader::new());
    let host = Host::with_config(dir.path(), loader, fast_host_config());
    host.start().await.expect("host starts");

    let bus = host.event_bus();
    bus.publish(pluginhost_core::event::Event::new("Ping", "test")).await;
    bus.publish(pluginhost_core::event::Event::new("Pong", "test")).await;
    sleep(Duration::from_millis(30)).await;

    let received = Arc::new(AtomicU32::new(0));
    let r = received.clone();
    bus.subscribe(
        "Ping",
        Arc::new(move |_e| {
            let r = r.clone();
            Box::pin(async move {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }),
    )
    .await;

    let replayed = bus.replay(Some("Ping"), 0).await.expect("replay");
    assert_eq!(replayed, 1);
    sleep(Duration::from_millis(30)).await;
    assert_eq!(received.load(Ordering::SeqCst), 1);

    host.shutdown().await.expect("shutdown");
}

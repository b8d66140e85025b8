//! Simulation node behaviour against the recording mock backend.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use simbridge::{
    BridgeConfig, BridgeError, Plugin, PluginError, PluginRegistry, SimulationNode,
};
use simbridge_bus::{Bus, Empty, JointState, Subscriber, JOINT_STATES_TOPIC};
use simbridge_physics::mock::{BackendCall, CallLog, MockBackend};
use simbridge_physics::{shared, ConnectionMode, JointType, LoadOptions, UrdfFlags};
use tokio::sync::watch;

fn config() -> BridgeConfig {
    BridgeConfig {
        gui: false,
        robot_urdf_path: Some(PathBuf::from("arm.urdf")),
        ..BridgeConfig::default()
    }
}

fn arm() -> MockBackend {
    MockBackend::new([
        ("base_weld", JointType::Fixed),
        ("joint1", JointType::Revolute),
        ("slider", JointType::Prismatic),
        ("joint2", JointType::Revolute),
    ])
}

struct Harness {
    node: Arc<SimulationNode>,
    bus: Bus,
    log: CallLog,
    states: Subscriber<JointState>,
}

fn start_with(config: BridgeConfig, registry: PluginRegistry) -> Harness {
    let mock = arm();
    let log = mock.log();
    let bus = Bus::new();
    let states = bus.subscribe::<JointState>(JOINT_STATES_TOPIC).unwrap();
    let node = SimulationNode::start(config, shared(mock), bus.clone(), registry).unwrap();
    log.clear();
    Harness {
        node,
        bus,
        log,
        states,
    }
}

fn start(config: BridgeConfig) -> Harness {
    start_with(config, PluginRegistry::new())
}

/// Plugin that records its label and how many steps preceded each call.
struct Recorder {
    label: &'static str,
    log: CallLog,
    seen: Arc<Mutex<Vec<(&'static str, usize)>>>,
}

impl Plugin for Recorder {
    fn execute(&mut self) -> Result<(), PluginError> {
        self.seen
            .lock()
            .unwrap()
            .push((self.label, self.log.steps()));
        Ok(())
    }
}

struct Failing;

impl Plugin for Failing {
    fn execute(&mut self) -> Result<(), PluginError> {
        Err(PluginError::Failed("controller diverged".into()))
    }
}

#[test]
fn startup_sequence() {
    let mock = arm();
    let log = mock.log();
    let config = BridgeConfig {
        data_path: Some(PathBuf::from("/opt/assets")),
        robot_pose_x: 1.0,
        fixed_base: true,
        ..config()
    };
    let node = SimulationNode::start(config, shared(mock), Bus::new(), PluginRegistry::new()).unwrap();

    let calls = log.calls();
    assert_eq!(calls[0], BackendCall::Connect(ConnectionMode::Direct));
    assert_eq!(calls[1], BackendCall::SetSearchPath(PathBuf::from("/opt/assets")));
    match &calls[2] {
        BackendCall::LoadUrdf { path, options } => {
            assert_eq!(path, &PathBuf::from("arm.urdf"));
            assert_eq!(options.base_position, [1.0, 0.0, 1.0]);
            assert!(options.use_fixed_base);
            assert_eq!(options.flags, UrdfFlags::USE_SELF_COLLISION);
        }
        other => panic!("expected LoadUrdf, got {other:?}"),
    }
    assert_eq!(calls[3], BackendCall::SetGravity([0.0, 0.0, -9.81]));
    assert_eq!(calls[4], BackendCall::LoadGroundPlane);
    assert_eq!(calls[5], BackendCall::SetRealTime(false));
    assert_eq!(log.steps(), 0);

    let table: Vec<(usize, String)> = node
        .joint_table()
        .iter()
        .map(|(i, n)| (i, n.to_string()))
        .collect();
    assert_eq!(table, [(1, "joint1".to_string()), (3, "joint2".to_string())]);
    assert!(!node.is_paused());
}

#[test]
fn gui_mode_requested() {
    let mock = arm();
    let log = mock.log();
    let config = BridgeConfig {
        gui: true,
        ..config()
    };
    SimulationNode::start(config, shared(mock), Bus::new(), PluginRegistry::new()).unwrap();
    assert_eq!(log.calls()[0], BackendCall::Connect(ConnectionMode::Gui));
}

#[test]
fn missing_urdf_path_is_fatal() {
    let mock = arm();
    let log = mock.log();
    let config = BridgeConfig {
        robot_urdf_path: None,
        ..config()
    };
    let err = SimulationNode::start(config, shared(mock), Bus::new(), PluginRegistry::new())
        .err()
        .unwrap();
    assert!(matches!(err, BridgeError::MissingParam("robot_urdf_path")));
    assert_eq!(log.calls().last(), Some(&BackendCall::Disconnect));
}

#[test]
fn connect_failure_is_fatal() {
    let mock = arm().failing_connect();
    let err = SimulationNode::start(config(), shared(mock), Bus::new(), PluginRegistry::new())
        .err()
        .unwrap();
    assert!(matches!(err, BridgeError::Physics(_)));
}

#[test]
fn running_tick_publishes_once_and_steps_once() {
    let mut h = start(config());

    assert!(h.node.tick().unwrap());
    assert_eq!(h.log.steps(), 1);
    let msg = h.states.take_new().expect("one joint state per tick");
    assert_eq!(msg.name, ["joint1", "joint2"]);
    assert_eq!(msg.position.len(), 2);
    assert_eq!(msg.velocity.len(), 2);
    assert_eq!(msg.effort.len(), 2);
    assert!(msg.header.stamp.sec > 0);

    assert!(h.node.tick().unwrap());
    assert_eq!(h.log.steps(), 2);
    let again = h.states.take_new().unwrap();
    assert_eq!(again.name, msg.name);
    assert!(again.header.stamp >= msg.header.stamp);
}

#[test]
fn published_values_come_from_the_backend() {
    let mut h = start(config());
    let robot = h.node.robot();
    {
        let mut backend = h.node.backend().lock().unwrap();
        backend.set_joint_velocity(robot, 3, 2.0).unwrap();
        backend.set_joint_effort(robot, 1, 0.75).unwrap();
    }

    h.node.tick().unwrap();
    let first = h.states.take_new().unwrap();
    assert_eq!(first.position, [0.0, 0.0]);
    assert_eq!(first.velocity, [0.0, 2.0]);

    h.node.tick().unwrap();
    let second = h.states.take_new().unwrap();
    let expected = h.node.backend().lock().unwrap().joint_state(robot, 3).unwrap();
    assert!((second.position[1] - 0.02).abs() < 1e-12);
    assert!(second.position[1] < expected.position);
    assert_eq!(second.effort, [0.75, 0.0]);
}

#[test]
fn paused_tick_does_nothing() {
    let mut h = start(BridgeConfig {
        pause_simulation: true,
        ..config()
    });
    assert!(h.node.is_paused());

    for _ in 0..5 {
        assert!(!h.node.tick().unwrap());
    }
    assert_eq!(h.log.steps(), 0);
    assert!(h.states.take_new().is_none());
}

#[test]
fn pause_and_unpause_services() {
    let mut h = start(config());
    assert_eq!(
        h.bus.services(),
        [
            "/simbridge/pause_physics",
            "/simbridge/reset_simulation",
            "/simbridge/unpause_physics"
        ]
    );

    h.bus.call_service("/simbridge/pause_physics", Empty {}).unwrap();
    assert!(h.node.is_paused());
    for _ in 0..3 {
        h.node.tick().unwrap();
    }
    assert_eq!(h.log.steps(), 0);
    assert!(h.states.take_new().is_none());

    h.bus.call_service("/simbridge/unpause_physics", Empty {}).unwrap();
    assert!(!h.node.is_paused());
    h.node.tick().unwrap();
    assert_eq!(h.log.steps(), 1);
    assert!(h.states.take_new().is_some());
}

#[test]
fn reset_reloads_world_and_resumes() {
    let h = start(BridgeConfig {
        pause_simulation: true,
        ..config()
    });
    h.node.tick().unwrap();

    h.bus
        .call_service("/simbridge/reset_simulation", Empty {})
        .unwrap();

    let calls = h.log.calls();
    assert_eq!(calls[0], BackendCall::Reset);
    assert!(matches!(
        &calls[1],
        BackendCall::LoadUrdf { options, .. } if options.base_position == [0.0, 0.0, 1.0]
    ));
    assert_eq!(calls[2], BackendCall::SetGravity([0.0, 0.0, -9.81]));
    assert_eq!(calls[3], BackendCall::LoadGroundPlane);
    assert!(!h.node.is_paused());
    assert_eq!(h.node.joint_table().names(), ["joint1", "joint2"]);

    h.node.tick().unwrap();
    assert_eq!(h.log.steps(), 1);
}

#[test]
fn plugins_run_in_module_order_between_publish_and_step() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mock = arm();
    let log = mock.log();

    let mut registry = PluginRegistry::new();
    for (module, label) in [("b_second", "second"), ("a_first", "first")] {
        let seen = seen.clone();
        let log = log.clone();
        registry.register(module, "Recorder", move |_| {
            let plugin: Box<dyn Plugin> = Box::new(Recorder {
                label,
                log: log.clone(),
                seen: seen.clone(),
            });
            Ok(plugin)
        });
    }

    let mut config = config();
    config.plugins.insert("b_second".into(), "Recorder".into());
    config.plugins.insert("a_first".into(), "Recorder".into());

    let node = SimulationNode::start(config, shared(mock), Bus::new(), registry).unwrap();
    assert_eq!(
        node.plugins(),
        [
            ("a_first".to_string(), "Recorder".to_string()),
            ("b_second".to_string(), "Recorder".to_string())
        ]
    );

    node.tick().unwrap();
    node.tick().unwrap();
    node.pause();
    node.tick().unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        [("first", 0), ("second", 0), ("first", 1), ("second", 1)]
    );
}

#[test]
fn unknown_plugin_is_fatal() {
    let mock = arm();
    let log = mock.log();
    let mut config = config();
    config.plugins.insert("teleop".into(), "Keyboard".into());

    let err = SimulationNode::start(config, shared(mock), Bus::new(), PluginRegistry::builtin())
        .err()
        .unwrap();
    assert!(matches!(
        err,
        BridgeError::UnknownPlugin { ref module, ref class } if module == "teleop" && class == "Keyboard"
    ));
    assert_eq!(log.calls().last(), Some(&BackendCall::Disconnect));
}

#[test]
fn plugin_construction_error_is_fatal() {
    let mut registry = PluginRegistry::new();
    registry.register("broken", "Broken", |_| {
        Err(PluginError::Failed("no calibration".into()))
    });
    let mut config = config();
    config.plugins.insert("broken".into(), "Broken".into());

    let err = SimulationNode::start(config, shared(arm()), Bus::new(), registry)
        .err()
        .unwrap();
    assert!(matches!(err, BridgeError::Plugin { .. }));
}

#[test]
fn plugin_error_aborts_tick_before_step() {
    let mut registry = PluginRegistry::new();
    registry.register("failing", "Failing", |_| {
        let plugin: Box<dyn Plugin> = Box::new(Failing);
        Ok(plugin)
    });
    let mut config = config();
    config.plugins.insert("failing".into(), "Failing".into());
    let h = start_with(config, registry);

    let err = h.node.tick().unwrap_err();
    assert!(matches!(err, BridgeError::Plugin { ref module, .. } if module == "failing"));
    assert_eq!(h.log.steps(), 0);
}

#[test]
fn reset_reconstructs_plugins() {
    let built = Arc::new(AtomicUsize::new(0));
    let mut registry = PluginRegistry::new();
    {
        let built = built.clone();
        registry.register("counter", "Counter", move |ctx| {
            built.fetch_add(1, Ordering::SeqCst);
            assert_eq!(ctx.joints.len(), 2);
            let plugin: Box<dyn Plugin> = Box::new(Recorder {
                label: "counter",
                log: CallLog::default(),
                seen: Arc::new(Mutex::new(Vec::new())),
            });
            Ok(plugin)
        });
    }
    let mut config = config();
    config.plugins.insert("counter".into(), "Counter".into());
    let h = start_with(config, registry);
    assert_eq!(built.load(Ordering::SeqCst), 1);

    h.node.reset().unwrap();
    assert_eq!(built.load(Ordering::SeqCst), 2);
    assert_eq!(h.node.plugins().len(), 1);
}

#[test]
fn dropping_node_removes_services() {
    let h = start(config());
    let bus = h.bus.clone();
    drop(h);
    assert!(bus.services().is_empty());
}

#[test]
fn second_node_with_same_name_is_rejected() {
    let h = start(config());
    let err = SimulationNode::start(config(), shared(arm()), h.bus.clone(), PluginRegistry::new())
        .err()
        .unwrap();
    assert!(matches!(err, BridgeError::Bus(_)));
    assert_eq!(h.bus.services().len(), 3);
}

#[test]
fn joint_control_through_the_bus() {
    use simbridge_bus::{CommandMode, JointCommand, Publish, JOINT_COMMANDS_TOPIC};

    let mut config = config();
    config
        .plugins
        .insert("joint_control".into(), "JointControl".into());
    let mut h = start_with(config, PluginRegistry::builtin());

    let commands = h
        .bus
        .advertise::<JointCommand>(JOINT_COMMANDS_TOPIC)
        .unwrap();
    commands
        .publish(JointCommand {
            mode: CommandMode::Position,
            name: vec!["joint2".into()],
            values: vec![0.4],
        })
        .unwrap();

    h.node.tick().unwrap();
    assert!(h.log.calls().contains(&BackendCall::SetJointPosition(3, 0.4)));
    h.states.take_new().unwrap();

    h.node.tick().unwrap();
    let msg = h.states.take_new().unwrap();
    assert_eq!(msg.position, [0.0, 0.4]);
}

#[tokio::test(start_paused = true)]
async fn run_ticks_until_shutdown() {
    let h = start(config());
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(h.node.clone().run(stop_rx));

    tokio::time::sleep(Duration::from_millis(100)).await;
    stop_tx.send(true).unwrap();
    task.await.unwrap().unwrap();

    // 80 Hz over 100 ms, first tick immediate.
    let steps = h.log.steps();
    assert!((7..=10).contains(&steps), "steps = {steps}");
    assert_eq!(h.log.calls().last(), Some(&BackendCall::Disconnect));
}

#[tokio::test(start_paused = true)]
async fn run_while_paused_never_steps() {
    let h = start(BridgeConfig {
        pause_simulation: true,
        ..config()
    });
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(h.node.clone().run(stop_rx));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.log.steps(), 0);

    h.node.unpause();
    tokio::time::sleep(Duration::from_millis(50)).await;
    stop_tx.send(true).unwrap();
    task.await.unwrap().unwrap();
    assert!(h.log.steps() >= 3);
}

#[tokio::test(start_paused = true)]
async fn run_returns_plugin_error() {
    let mut registry = PluginRegistry::new();
    registry.register("failing", "Failing", |_| {
        let plugin: Box<dyn Plugin> = Box::new(Failing);
        Ok(plugin)
    });
    let mut config = config();
    config.plugins.insert("failing".into(), "Failing".into());
    let h = start_with(config, registry);

    let (_stop_tx, stop_rx) = watch::channel(false);
    let err = h.node.clone().run(stop_rx).await.unwrap_err();
    assert!(matches!(err, BridgeError::Plugin { .. }));
    assert_eq!(h.log.calls().last(), Some(&BackendCall::Disconnect));
}

#[test]
fn load_options_reach_backend_unchanged() {
    let mock = arm();
    let log = mock.log();
    let config = BridgeConfig {
        use_inertia_from_file: true,
        ..config()
    };
    SimulationNode::start(config.clone(), shared(mock), Bus::new(), PluginRegistry::new()).unwrap();
    let expected: LoadOptions = config.load_options();
    assert!(log.calls().contains(&BackendCall::LoadUrdf {
        path: PathBuf::from("arm.urdf"),
        options: expected,
    }));
}

#[test]
fn unrepresentable_loop_rate_is_rejected_at_startup() {
    let mock = arm();
    let log = mock.log();
    let config = BridgeConfig {
        loop_rate: 1e12,
        ..config()
    };
    let err = SimulationNode::start(config, shared(mock), Bus::new(), PluginRegistry::new())
        .err()
        .unwrap();
    assert!(matches!(err, BridgeError::InvalidParam { name: "loop_rate", .. }));
    assert!(log.calls().is_empty());
}

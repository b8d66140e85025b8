//! The simulation node: startup, tick loop and control services.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use simbridge_bus::{
    Bus, BusError, Empty, Header, JointState, Publish, JOINT_STATES_TOPIC,
};
use simbridge_physics::{PhysicsBackend, RobotHandle, SharedBackend};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::joint_table::JointTable;
use crate::pause::PauseFlag;
use crate::plugin::{Plugin, PluginContext, PluginRegistry};

/// Service that reloads the world.
pub const RESET_SERVICE: &str = "reset_simulation";
/// Service that stops ticking.
pub const PAUSE_SERVICE: &str = "pause_physics";
/// Service that resumes ticking.
pub const UNPAUSE_SERVICE: &str = "unpause_physics";

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

struct LoadedPlugin {
    module: String,
    class: String,
    plugin: Box<dyn Plugin>,
}

/// Everything a tick or a reset touches.
struct SimState {
    robot: RobotHandle,
    joints: Arc<JointTable>,
    plugins: Vec<LoadedPlugin>,
}

/// A running bridge between one simulated robot and the bus.
///
/// Created by [`SimulationNode::start`], driven by [`SimulationNode::run`]
/// (or by calling [`SimulationNode::tick`] directly). Ticks and resets are
/// serialized by one lock, so a reset never lands in the middle of a tick.
pub struct SimulationNode {
    config: BridgeConfig,
    backend: SharedBackend,
    bus: Bus,
    registry: PluginRegistry,
    paused: PauseFlag,
    state: Mutex<SimState>,
    joint_states: Box<dyn Publish<JointState>>,
    services: Mutex<Vec<String>>,
}

impl SimulationNode {
    /// Connect, load the world, construct plugins and advertise services.
    ///
    /// On failure the backend is disconnected again.
    pub fn start(
        config: BridgeConfig,
        backend: SharedBackend,
        bus: Bus,
        registry: PluginRegistry,
    ) -> Result<Arc<Self>, BridgeError> {
        config.validate()?;
        let joint_states = bus.advertise::<JointState>(JOINT_STATES_TOPIC)?;

        let state = match bring_up(&config, &backend, &bus, &registry) {
            Ok(state) => state,
            Err(e) => {
                lock(&backend).disconnect();
                return Err(e);
            }
        };

        let node = Arc::new(Self {
            paused: PauseFlag::new(config.pause_simulation),
            config,
            backend,
            bus,
            registry,
            state: Mutex::new(state),
            joint_states: Box::new(joint_states),
            services: Mutex::new(Vec::new()),
        });
        if let Err(e) = node.advertise_services() {
            node.stop();
            return Err(e);
        }

        if node.is_paused() {
            info!("simulation starts paused");
        }
        info!("simulation bridge started");
        Ok(node)
    }

    fn advertise_services(self: &Arc<Self>) -> Result<(), BridgeError> {
        self.service(RESET_SERVICE, |node| node.reset())?;
        self.service(PAUSE_SERVICE, |node| {
            node.pause();
            Ok(())
        })?;
        self.service(UNPAUSE_SERVICE, |node| {
            node.unpause();
            Ok(())
        })?;
        Ok(())
    }

    /// Register `handler` under this node's namespace. The handler only holds
    /// a weak reference, so the bus never keeps a stopped node alive.
    fn service<F>(self: &Arc<Self>, service: &'static str, handler: F) -> Result<(), BridgeError>
    where
        F: Fn(&SimulationNode) -> Result<(), BridgeError> + Send + Sync + 'static,
    {
        let name = self.config.service_name(service);
        let weak: Weak<Self> = Arc::downgrade(self);
        let failed = {
            let name = name.clone();
            move |message: String| BusError::Service {
                service: name.clone(),
                message,
            }
        };
        self.bus.advertise_service(&name, move |_: Empty| {
            let node = weak
                .upgrade()
                .ok_or_else(|| failed("node stopped".into()))?;
            handler(&node).map_err(|e| failed(e.to_string()))?;
            Ok(Empty {})
        })?;
        lock(&self.services).push(name);
        Ok(())
    }

    /// One iteration of the control loop.
    ///
    /// When paused, does nothing and returns `Ok(false)`. Otherwise publishes
    /// joint state, executes every plugin in order and steps the physics
    /// once, returning `Ok(true)`.
    pub fn tick(&self) -> Result<bool, BridgeError> {
        if self.paused.is_paused() {
            return Ok(false);
        }

        let mut state = lock(&self.state);

        let sample = {
            let backend = lock(&self.backend);
            let mut msg = JointState::with_capacity(Header::now(), state.joints.len());
            for (index, name) in state.joints.iter() {
                let reading = backend.joint_state(state.robot, index)?;
                msg.push(name, reading.position, reading.velocity, reading.applied_effort);
            }
            msg
        };
        self.joint_states.publish(sample)?;

        for loaded in &mut state.plugins {
            loaded
                .plugin
                .execute()
                .map_err(|source| BridgeError::Plugin {
                    module: loaded.module.clone(),
                    class: loaded.class.clone(),
                    source,
                })?;
        }

        lock(&self.backend).step_simulation()?;
        Ok(true)
    }

    /// Tick at the configured rate until `shutdown` turns true, then
    /// disconnect the backend.
    ///
    /// A tick that runs late delays the following ones instead of bursting to
    /// catch up. A tick error stops the loop and is returned.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<(), BridgeError> {
        let mut interval = tokio::time::interval(self.config.period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("simulation loop running at {} Hz", self.config.loop_rate);

        let result = if *shutdown.borrow() {
            Ok(())
        } else {
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.tick() {
                            break Err(e);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break Ok(());
                        }
                    }
                }
            }
        };

        self.stop();
        result
    }

    /// Drop plugins and disconnect the backend.
    pub fn stop(&self) {
        let mut state = lock(&self.state);
        state.plugins.clear();
        lock(&self.backend).disconnect();
        info!("simulation stopped");
    }

    /// Clear the world and load it again from the configuration.
    ///
    /// The node is paused while the world is rebuilt and running afterwards.
    /// The joint table is rebuilt and plugins are constructed anew for the
    /// reloaded robot. If reloading fails the node stays paused.
    pub fn reset(&self) -> Result<(), BridgeError> {
        info!("resetting simulation now");
        let mut state = lock(&self.state);
        self.paused.pause();
        state.plugins.clear();

        let (robot, joints) = {
            let mut guard = lock(&self.backend);
            let backend: &mut dyn PhysicsBackend = &mut *guard;
            backend.reset_simulation()?;
            let robot = load_world(&self.config, backend)?;
            let joints = Arc::new(JointTable::from_backend(backend, robot)?);
            (robot, joints)
        };
        let plugins = load_plugins(
            &self.config,
            &self.registry,
            &self.backend,
            robot,
            &joints,
            &self.bus,
        )?;
        *state = SimState {
            robot,
            joints,
            plugins,
        };

        self.paused.unpause();
        Ok(())
    }

    /// Stop simulation work from the next tick on.
    pub fn pause(&self) {
        info!("pausing simulation");
        self.paused.pause();
    }

    /// Resume simulation work from the next tick on.
    pub fn unpause(&self) {
        info!("unpausing simulation");
        self.paused.unpause();
    }

    /// Whether ticks are currently skipped.
    pub fn is_paused(&self) -> bool {
        self.paused.is_paused()
    }

    /// Revolute joints of the current robot.
    pub fn joint_table(&self) -> Arc<JointTable> {
        lock(&self.state).joints.clone()
    }

    /// Handle of the current robot.
    pub fn robot(&self) -> RobotHandle {
        lock(&self.state).robot
    }

    /// `(module, class)` of the loaded plugins, in execution order.
    pub fn plugins(&self) -> Vec<(String, String)> {
        lock(&self.state)
            .plugins
            .iter()
            .map(|p| (p.module.clone(), p.class.clone()))
            .collect()
    }

    /// The configuration the node was started with.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The bus the node publishes on.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// The simulator.
    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }
}

impl Drop for SimulationNode {
    fn drop(&mut self) {
        for name in lock(&self.services).drain(..) {
            self.bus.unadvertise_service(&name);
        }
    }
}

fn bring_up(
    config: &BridgeConfig,
    backend: &SharedBackend,
    bus: &Bus,
    registry: &PluginRegistry,
) -> Result<SimState, BridgeError> {
    let (robot, joints) = {
        let mut guard = lock(backend);
        let backend: &mut dyn PhysicsBackend = &mut *guard;

        let mode = config.connection_mode();
        info!("running {} in {:?} mode", backend.name(), mode);
        backend.connect(mode)?;

        let robot = load_world(config, backend)?;
        backend.set_real_time_simulation(false)?;

        let joints = JointTable::from_backend(backend, robot)?;
        debug!("revolute joints: {:?}", joints.names());
        (robot, Arc::new(joints))
    };

    // Plugins may lock the backend while constructing.
    let plugins = load_plugins(config, registry, backend, robot, &joints, bus)?;
    Ok(SimState {
        robot,
        joints,
        plugins,
    })
}

/// Search path, robot, gravity and ground plane.
fn load_world(config: &BridgeConfig, backend: &mut dyn PhysicsBackend) -> Result<RobotHandle, BridgeError> {
    if let Some(dir) = &config.data_path {
        backend.set_additional_search_path(dir)?;
    }
    let urdf = config.urdf_path()?;
    let robot = backend.load_urdf(urdf, &config.load_options())?;
    backend.set_gravity(config.gravity_vector())?;
    backend.load_ground_plane()?;
    info!("loaded {} as {}", urdf.display(), robot);
    Ok(robot)
}

fn load_plugins(
    config: &BridgeConfig,
    registry: &PluginRegistry,
    backend: &SharedBackend,
    robot: RobotHandle,
    joints: &Arc<JointTable>,
    bus: &Bus,
) -> Result<Vec<LoadedPlugin>, BridgeError> {
    if config.plugins.is_empty() {
        warn!("no plugins found, forgot to set plugins in the config?");
        return Ok(Vec::new());
    }

    let ctx = PluginContext {
        backend: backend.clone(),
        robot,
        joints: joints.clone(),
        bus: bus.clone(),
    };

    config
        .plugins
        .iter()
        .map(|(module, class)| {
            info!("loading {class} class from {module} plugin");
            let factory = registry
                .get(module, class)
                .ok_or_else(|| BridgeError::UnknownPlugin {
                    module: module.clone(),
                    class: class.clone(),
                })?;
            let plugin = factory(&ctx).map_err(|source| BridgeError::Plugin {
                module: module.clone(),
                class: class.clone(),
                source,
            })?;
            Ok(LoadedPlugin {
                module: module.clone(),
                class: class.clone(),
                plugin,
            })
        })
        .collect()
}

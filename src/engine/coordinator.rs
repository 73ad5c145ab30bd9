use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::RwLock;

use crate::buffers::ScratchPool;
use crate::config::{DeviceSettings, FleetConfig};
use crate::error::{AmpError, Result};
use crate::firmware::{Container, ContainerLoader, ProfileTable};
use crate::fleet::{
    AmpDevice, CalibrationState, ControlRequests, DeviceRegistry, DeviceState, Lookup, LookupCache,
    StreamFlags,
};
use crate::hal::registers::interrupts;
use crate::hal::{DspCore, FirmwareSource, RegisterBus, TemperatureSource};
use crate::observability::{BlackboxCollector, DeviceCounters, FleetReport};
use crate::transport::{FaultListener, FaultListeners, ListenerId, Transport};

use super::barrier::{bit, SyncBarrier};
use super::state::{Configured, DspState, FwState, Transition};

/// State behind the fleet-wide lock. Never held across a bus transfer.
pub(crate) struct FleetShared {
    pub registry: DeviceRegistry<Arc<AmpDevice>>,
    pub lookups: LookupCache<Arc<AmpDevice>>,
    pub container: Option<Arc<Container>>,
    pub profiles: ProfileTable,
    /// Mixer-facing profile index
    pub mixer_profile: usize,
    /// Container profile the fleet runs
    pub profile: usize,
    pub rate: u32,
    pub barrier: SyncBarrier,
    /// Devices whose last start succeeded and that were not stopped since
    pub running: u8,
    /// Devices paused or deactivated through the mixer
    pub inactive: u8,
    pub scratch: Option<ScratchPool>,
    pub reload_count: u32,
    pub ipc_id: (u32, u32),
}

/// Point-in-time view of one device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub index: usize,
    pub channel: u8,
    pub fw_state: FwState,
    pub dsp_state: DspState,
    pub configured: Configured,
    pub profile: usize,
    pub vstep: usize,
    pub streams: StreamFlags,
    pub requests: ControlRequests,
    pub calibration: CalibrationState,
    pub speaker_damaged: bool,
}

/// Coordinates firmware, lifecycle, barrier, calibration and monitoring
/// for every attached amplifier.
pub struct FleetCoordinator {
    pub(crate) this: Weak<FleetCoordinator>,
    pub(crate) config: FleetConfig,
    shared: Mutex<FleetShared>,
    pub(crate) loader: ContainerLoader,
    listeners: Arc<FaultListeners>,
    blackbox: Arc<AtomicBool>,
    pub(crate) temperature: Option<Arc<dyn TemperatureSource>>,
    /// Shared by lifecycle entry points, exclusive for calibration
    pub(crate) gate: RwLock<()>,
}

impl FleetCoordinator {
    pub fn new(config: FleetConfig, firmware: Arc<dyn FirmwareSource>) -> Arc<Self> {
        Self::build(config, firmware, None)
    }

    pub fn with_sensor(
        config: FleetConfig,
        firmware: Arc<dyn FirmwareSource>,
        sensor: Arc<dyn TemperatureSource>,
    ) -> Arc<Self> {
        Self::build(config, firmware, Some(sensor))
    }

    fn build(
        config: FleetConfig,
        firmware: Arc<dyn FirmwareSource>,
        temperature: Option<Arc<dyn TemperatureSource>>,
    ) -> Arc<Self> {
        let loader = ContainerLoader::new(firmware, config.firmware_name.clone(), config.firmware_retry.clone());
        let blackbox = Arc::new(AtomicBool::new(config.blackbox_enabled));

        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            shared: Mutex::new(FleetShared {
                registry: DeviceRegistry::new(),
                lookups: LookupCache::new(),
                container: None,
                profiles: ProfileTable::default(),
                mixer_profile: 0,
                profile: 0,
                rate: 48000,
                barrier: SyncBarrier::new(),
                running: 0,
                inactive: 0,
                scratch: None,
                reload_count: 0,
                ipc_id: (0, 0),
            }),
            loader,
            listeners: Arc::new(FaultListeners::new()),
            blackbox,
            temperature,
            gate: RwLock::new(()),
            config,
        })
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub(crate) fn shared(&self) -> MutexGuard<'_, FleetShared> {
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn device(&self, lookup: Lookup) -> Result<Arc<AmpDevice>> {
        let mut guard = self.shared();
        let shared = &mut *guard;
        shared
            .lookups
            .resolve(&shared.registry, lookup)
            .ok_or_else(|| AmpError::NoDevice(format!("{:?}", lookup)))
    }

    /// Attached devices in index order
    pub(crate) fn devices(&self) -> Vec<Arc<AmpDevice>> {
        self.shared()
            .registry
            .iter()
            .map(|(_, device)| device.clone())
            .collect()
    }

    pub(crate) fn note_running(&self, index: usize, running: bool) {
        let mut shared = self.shared();
        if running {
            shared.running |= bit(index);
        } else {
            shared.running &= !bit(index);
        }
    }

    pub(crate) fn interrupt_mask(&self) -> u16 {
        if self.blackbox_enabled() {
            interrupts::DEFAULT | interrupts::NO_CLOCK
        } else {
            interrupts::DEFAULT
        }
    }

    /// Register a device and load the container for it.
    ///
    /// A failed load leaves the device attached with `fw_state = Fail` so a
    /// later reload can retry.
    pub async fn attach(&self, settings: DeviceSettings, bus: Arc<dyn RegisterBus>) -> Result<usize> {
        let _gate = self.gate.read().await;

        let device = {
            let mut shared = self.shared();
            let counters = Arc::new(DeviceCounters::new());
            let transport_policy = self.config.transport_retry.clone();
            let trace = self.config.trace_registers;
            let listeners = self.listeners.clone();
            let blackbox = self.blackbox.clone();
            let channel = settings.channel;

            let id = shared.registry.register_with(channel, |id| {
                let transport = Transport::new(
                    settings.address,
                    bus,
                    transport_policy,
                    listeners,
                    counters.clone(),
                    blackbox,
                )
                .with_trace(trace);
                Arc::new(AmpDevice::new(id, settings, DspCore::new(id.index, transport), counters))
            })?;
            shared
                .registry
                .get(id)
                .cloned()
                .ok_or_else(|| AmpError::NoDevice(format!("{:?}", id)))?
        };

        let index = device.index();
        log::info!(
            "[amp{}] attached at 0x{:02x}, channel {}",
            index,
            device.settings.address,
            device.channel()
        );

        if let Err(e) = self.load_firmware(&device).await {
            log::error!("[amp{}] container load failed: {}", index, e);
        }
        Ok(index)
    }

    /// Stop a device, join its tasks and drop it from the registry
    pub async fn detach(&self, index: usize) -> Result<()> {
        let _gate = self.gate.read().await;
        let device = self.device(Lookup::Index(index))?;

        device.cancel_tasks().await;
        self.power_off(&device).await;

        let emptied = {
            let mut shared = self.shared();
            shared.registry.unregister(index);
            shared.running &= !bit(index);
            shared.inactive &= !bit(index);
            let emptied = shared.registry.is_empty();
            if emptied {
                shared.container = None;
                shared.profiles = ProfileTable::default();
                shared.scratch = None;
            }
            emptied
        };

        self.leave_barrier(index).await;
        device.state.lock().await.container = None;
        log::info!("[amp{}] detached", index);
        if emptied {
            log::info!("fleet empty, container released");
        }
        Ok(())
    }

    /// Load (or attach the already loaded) container for one device
    pub(crate) async fn load_firmware(&self, device: &Arc<AmpDevice>) -> Result<()> {
        let _load = self.loader.begin().await;
        let index = device.index();

        let reloading = {
            let mut st = device.state.lock().await;
            match st.fw_state {
                FwState::Ok => return Ok(()),
                FwState::Reloading => true,
                _ => {
                    st.set_fw_state(FwState::Pending);
                    false
                }
            }
        };

        let existing = self.shared().container.clone();
        let container = match existing {
            Some(container) => container,
            None => match self.loader.fetch().await {
                Ok(container) => {
                    let container = Arc::new(container);
                    let mut shared = self.shared();
                    shared.profiles = ProfileTable::from_container(&container);
                    shared.container = Some(container.clone());
                    container
                }
                Err(e) => {
                    device.state.lock().await.set_fw_state(FwState::Fail);
                    return Err(e);
                }
            },
        };

        let mut st = device.state.lock().await;
        st.container = Some(container.clone());

        if reloading {
            st.set_fw_state(FwState::Ok);
            let mut shared = self.shared();
            if shared.registry.is_head(index) {
                shared.reload_count += 1;
            }
            log::info!("[amp{}] container refreshed", index);
            return Ok(());
        }

        self.setup_device(device, &mut st, &container).await;
        Ok(())
    }

    /// One-time setup after a cold load
    async fn setup_device(&self, device: &AmpDevice, st: &mut DeviceState, container: &Container) {
        let index = device.index();

        let default = match &self.config.default_profile {
            Some(name) => container.find_profile(name).unwrap_or_else(|| {
                log::warn!("[amp{}] default profile '{}' not found, using profile 0", index, name);
                0
            }),
            None => 0,
        };

        // Later devices join the profile the fleet already runs
        let (profile, head) = {
            let mut shared = self.shared();
            let head = shared.registry.is_head(index);
            let profile = if head || shared.profile >= container.profile_count() {
                let mixer = shared.profiles.mixer_index_of(default).unwrap_or(0);
                shared.profile = default;
                shared.mixer_profile = mixer;
                default
            } else {
                shared.profile
            };
            if head && shared.scratch.is_none() {
                let settings = &self.config.scratch_buffers;
                shared.scratch = Some(ScratchPool::new(settings.count, settings.words));
            }
            (profile, head)
        };

        st.prof_vsteps = vec![0; container.profile_count()];
        st.select_profile(profile);
        st.set_fw_state(FwState::Ok);

        match device.dsp.read_calibration().await {
            Ok(Some(value)) => {
                st.calibration = CalibrationState {
                    value,
                    valid: true,
                    pending: None,
                };
            }
            Ok(None) => {
                st.calibration = CalibrationState {
                    value: 0,
                    valid: false,
                    pending: self.config.calibration.fallback_value,
                };
                log::warn!("[amp{}] not calibrated", index);
            }
            Err(e) => log::warn!("[amp{}] calibration state unreadable: {}", index, e),
        }

        if !device.settings.skip_interrupts {
            if let Err(e) = device.dsp.enable_interrupts(self.interrupt_mask()).await {
                log::warn!("[amp{}] interrupts not armed: {}", index, e);
            }
        }

        log::info!(
            "[amp{}] ready: profile {}, calibrated {}{}",
            index,
            profile,
            st.calibration.valid,
            if head { " (head)" } else { "" }
        );
    }

    pub fn register_fault_listener(&self, listener: Arc<dyn FaultListener>) -> ListenerId {
        self.listeners.register(listener)
    }

    pub fn unregister_fault_listener(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    pub fn blackbox_enabled(&self) -> bool {
        self.blackbox.load(Ordering::Relaxed)
    }

    pub fn set_blackbox(&self, enabled: bool) {
        self.blackbox.store(enabled, Ordering::Relaxed);
    }

    pub async fn status(&self, index: usize) -> Result<DeviceStatus> {
        let device = self.device(Lookup::Index(index))?;
        let st = device.state.lock().await;
        Ok(DeviceStatus {
            index,
            channel: device.channel(),
            fw_state: st.fw_state,
            dsp_state: st.dsp_state,
            configured: st.configured,
            profile: st.profile,
            vstep: st.vstep,
            streams: st.streams,
            requests: st.requests,
            calibration: st.calibration,
            speaker_damaged: st.speaker_damaged,
        })
    }

    pub async fn history(&self, index: usize) -> Result<Vec<Transition>> {
        let device = self.device(Lookup::Index(index))?;
        let st = device.state.lock().await;
        Ok(st.history().entries())
    }

    pub fn device_count(&self) -> usize {
        self.shared().registry.len()
    }

    pub fn head_index(&self) -> Option<usize> {
        self.shared().registry.head().map(|id| id.index)
    }

    /// Index of the device on a TDM channel
    pub fn index_for_channel(&self, channel: u8) -> Option<usize> {
        self.device(Lookup::Channel(channel)).ok().map(|d| d.index())
    }

    /// Starts counted in the current barrier episode
    pub fn sync_count(&self) -> usize {
        self.shared().barrier.count()
    }

    /// Devices considered live under the current profile
    pub fn active_devices(&self) -> Vec<usize> {
        let mask = Self::active_mask(&self.shared());
        (0..8).filter(|i| mask & bit(*i) != 0).collect()
    }

    pub fn container(&self) -> Option<Arc<Container>> {
        self.shared().container.clone()
    }

    pub fn reload_count(&self) -> u32 {
        self.shared().reload_count
    }

    pub fn blackbox_collector(&self) -> BlackboxCollector {
        let mut collector = BlackboxCollector::new();
        for device in self.devices() {
            collector.register(device.index(), device.channel(), device.counters.clone());
        }
        collector
    }

    pub fn blackbox_report(&self) -> String {
        FleetReport::new(self.blackbox_collector()).generate()
    }
}

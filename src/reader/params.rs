//! # Parameter Registry
//!
//! The typed get/set surface over the reader's configuration space. Each key
//! has a `/reader/...` path name; values are a closed union. Whether the
//! connected firmware supports a key is discovered lazily: the first touch
//! of an unprobed key attempts a get, and the outcome is cached in two
//! bitsets (`present`, `confirmed`) so later lookups are free.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::constants::*;
use crate::error::{ReaderError, Result};
use crate::reader::commands::{ConfigValue, Gen2Configuration};
use crate::reader::serial::SerialReader;
use crate::reader::transport::SerialTransport;
use crate::reader::{
    AntennaMapEntry, PortPowerAndSettlingTime, PortValue, PowerMode, Region, UserMode,
};
use crate::tag::gen2::{Gen2Q, Gen2Session, Gen2TagEncoding, Gen2Tari, Gen2Target, Gen2WriteMode};
use crate::tag::read_plan::ReadPlan;
use crate::tag::TagProtocol;
use crate::util::hex::{encode_hex_upper, hex_dotted_quad};

/// Every parameter key the driver knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Param {
    BaudRate,
    CommandTimeout,
    TransportTimeout,
    PowerMode,
    UserMode,
    AntennaCheckPort,
    AntennaPortList,
    AntennaConnectedPortList,
    AntennaPortSwitchGpos,
    AntennaSettlingTimeList,
    AntennaTxRxMap,
    GpioInputList,
    GpioOutputList,
    Gen2AccessPassword,
    Gen2Q,
    Gen2TagEncoding,
    Gen2Session,
    Gen2Target,
    Gen2Blf,
    Gen2Tari,
    Gen2WriteMode,
    Iso180006bBlf,
    ReadAsyncOffTime,
    ReadAsyncOnTime,
    ReadPlan,
    RadioEnablePowerSave,
    RadioPowerMax,
    RadioPowerMin,
    RadioPortReadPowerList,
    RadioPortWritePowerList,
    RadioReadPower,
    RadioWritePower,
    RadioTemperature,
    TagReadDataRecordHighestRssi,
    TagReadDataReportRssiInDbm,
    TagReadDataUniqueByAntenna,
    TagReadDataUniqueByData,
    TagOpAntenna,
    TagOpProtocol,
    VersionHardware,
    VersionSerial,
    VersionModel,
    VersionSoftware,
    VersionSupportedProtocols,
    RegionId,
    RegionSupportedRegions,
    RegionHopTable,
    RegionHopTime,
    RegionLbtEnable,
}

impl Param {
    /// All keys, in declaration order.
    pub const ALL: [Param; 49] = [
        Param::BaudRate,
        Param::CommandTimeout,
        Param::TransportTimeout,
        Param::PowerMode,
        Param::UserMode,
        Param::AntennaCheckPort,
        Param::AntennaPortList,
        Param::AntennaConnectedPortList,
        Param::AntennaPortSwitchGpos,
        Param::AntennaSettlingTimeList,
        Param::AntennaTxRxMap,
        Param::GpioInputList,
        Param::GpioOutputList,
        Param::Gen2AccessPassword,
        Param::Gen2Q,
        Param::Gen2TagEncoding,
        Param::Gen2Session,
        Param::Gen2Target,
        Param::Gen2Blf,
        Param::Gen2Tari,
        Param::Gen2WriteMode,
        Param::Iso180006bBlf,
        Param::ReadAsyncOffTime,
        Param::ReadAsyncOnTime,
        Param::ReadPlan,
        Param::RadioEnablePowerSave,
        Param::RadioPowerMax,
        Param::RadioPowerMin,
        Param::RadioPortReadPowerList,
        Param::RadioPortWritePowerList,
        Param::RadioReadPower,
        Param::RadioWritePower,
        Param::RadioTemperature,
        Param::TagReadDataRecordHighestRssi,
        Param::TagReadDataReportRssiInDbm,
        Param::TagReadDataUniqueByAntenna,
        Param::TagReadDataUniqueByData,
        Param::TagOpAntenna,
        Param::TagOpProtocol,
        Param::VersionHardware,
        Param::VersionSerial,
        Param::VersionModel,
        Param::VersionSoftware,
        Param::VersionSupportedProtocols,
        Param::RegionId,
        Param::RegionSupportedRegions,
        Param::RegionHopTable,
        Param::RegionHopTime,
        Param::RegionLbtEnable,
    ];

    /// The `/reader/...` path of this key.
    pub fn name(self) -> &'static str {
        match self {
            Param::BaudRate => "/reader/baudRate",
            Param::CommandTimeout => "/reader/commandTimeout",
            Param::TransportTimeout => "/reader/transportTimeout",
            Param::PowerMode => "/reader/powerMode",
            Param::UserMode => "/reader/userMode",
            Param::AntennaCheckPort => "/reader/antenna/checkPort",
            Param::AntennaPortList => "/reader/antenna/portList",
            Param::AntennaConnectedPortList => "/reader/antenna/connectedPortList",
            Param::AntennaPortSwitchGpos => "/reader/antenna/portSwitchGpos",
            Param::AntennaSettlingTimeList => "/reader/antenna/settlingTimeList",
            Param::AntennaTxRxMap => "/reader/antenna/txRxMap",
            Param::GpioInputList => "/reader/gpio/inputList",
            Param::GpioOutputList => "/reader/gpio/outputList",
            Param::Gen2AccessPassword => "/reader/gen2/accessPassword",
            Param::Gen2Q => "/reader/gen2/q",
            Param::Gen2TagEncoding => "/reader/gen2/tagEncoding",
            Param::Gen2Session => "/reader/gen2/session",
            Param::Gen2Target => "/reader/gen2/target",
            Param::Gen2Blf => "/reader/gen2/BLF",
            Param::Gen2Tari => "/reader/gen2/Tari",
            Param::Gen2WriteMode => "/reader/gen2/writeMode",
            Param::Iso180006bBlf => "/reader/iso180006b/BLF",
            Param::ReadAsyncOffTime => "/reader/read/asyncOffTime",
            Param::ReadAsyncOnTime => "/reader/read/asyncOnTime",
            Param::ReadPlan => "/reader/read/plan",
            Param::RadioEnablePowerSave => "/reader/radio/enablePowerSave",
            Param::RadioPowerMax => "/reader/radio/powerMax",
            Param::RadioPowerMin => "/reader/radio/powerMin",
            Param::RadioPortReadPowerList => "/reader/radio/portReadPowerList",
            Param::RadioPortWritePowerList => "/reader/radio/portWritePowerList",
            Param::RadioReadPower => "/reader/radio/readPower",
            Param::RadioWritePower => "/reader/radio/writePower",
            Param::RadioTemperature => "/reader/radio/temperature",
            Param::TagReadDataRecordHighestRssi => "/reader/tagReadData/recordHighestRssi",
            Param::TagReadDataReportRssiInDbm => "/reader/tagReadData/reportRssiInDbm",
            Param::TagReadDataUniqueByAntenna => "/reader/tagReadData/uniqueByAntenna",
            Param::TagReadDataUniqueByData => "/reader/tagReadData/uniqueByData",
            Param::TagOpAntenna => "/reader/tagop/antenna",
            Param::TagOpProtocol => "/reader/tagop/protocol",
            Param::VersionHardware => "/reader/version/hardware",
            Param::VersionSerial => "/reader/version/serial",
            Param::VersionModel => "/reader/version/model",
            Param::VersionSoftware => "/reader/version/software",
            Param::VersionSupportedProtocols => "/reader/version/supportedProtocols",
            Param::RegionId => "/reader/region/id",
            Param::RegionSupportedRegions => "/reader/region/supportedRegions",
            Param::RegionHopTable => "/reader/region/hopTable",
            Param::RegionHopTime => "/reader/region/hopTime",
            Param::RegionLbtEnable => "/reader/region/lbt/enable",
        }
    }

    /// Looks a key up by its path name.
    pub fn from_name(name: &str) -> Option<Param> {
        static BY_NAME: Lazy<HashMap<&'static str, Param>> = Lazy::new(|| {
            Param::ALL.iter().map(|p| (p.name(), *p)).collect()
        });
        BY_NAME.get(name).copied()
    }
}

/// A typed parameter value.
#[derive(Debug, Clone)]
pub enum ParamValue {
    U8(u8),
    U16(u16),
    U32(u32),
    Bool(bool),
    String(String),
    U8List(Vec<u8>),
    U32List(Vec<u32>),
    PortValueList(Vec<PortValue>),
    AntennaMapList(Vec<AntennaMapEntry>),
    PowerMode(PowerMode),
    UserMode(UserMode),
    Region(Region),
    RegionList(Vec<Region>),
    Protocol(TagProtocol),
    ProtocolList(Vec<TagProtocol>),
    Gen2Q(Gen2Q),
    Gen2Session(Gen2Session),
    Gen2Target(Gen2Target),
    Gen2TagEncoding(Gen2TagEncoding),
    Gen2Tari(Gen2Tari),
    Gen2WriteMode(Gen2WriteMode),
    ReadPlan(ReadPlan),
}

/// Presence bitset over the parameter-key space.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParamBitSet([u32; 2]);

impl ParamBitSet {
    pub fn get(&self, key: Param) -> bool {
        let bit = key as u8 as usize;
        self.0[bit / 32] & (1 << (bit % 32)) != 0
    }

    pub fn set(&mut self, key: Param) {
        let bit = key as u8 as usize;
        self.0[bit / 32] |= 1 << (bit % 32);
    }
}

/// The field a per-port value list addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortField {
    ReadPower,
    WritePower,
    SettlingTime,
}

impl PortField {
    fn get(self, port: &PortPowerAndSettlingTime) -> u16 {
        match self {
            PortField::ReadPower => port.read_power,
            PortField::WritePower => port.write_power,
            PortField::SettlingTime => port.settling_time,
        }
    }

    fn set(self, port: &mut PortPowerAndSettlingTime, value: u16) {
        match self {
            PortField::ReadPower => port.read_power = value,
            PortField::WritePower => port.write_power = value,
            PortField::SettlingTime => port.settling_time = value,
        }
    }
}

impl<T: SerialTransport> SerialReader<T> {
    /// Marks the keys every serial module advertises; these skip the lazy
    /// probe entirely.
    pub(crate) fn seed_param_presence(&mut self) {
        self.param_present = ParamBitSet::default();
        self.param_confirmed = ParamBitSet::default();

        const ALWAYS_PRESENT: [Param; 45] = [
            Param::BaudRate,
            Param::CommandTimeout,
            Param::TransportTimeout,
            Param::PowerMode,
            Param::UserMode,
            Param::AntennaCheckPort,
            Param::AntennaPortList,
            Param::AntennaConnectedPortList,
            Param::AntennaPortSwitchGpos,
            Param::AntennaSettlingTimeList,
            Param::AntennaTxRxMap,
            Param::GpioInputList,
            Param::GpioOutputList,
            Param::Gen2AccessPassword,
            Param::Gen2Q,
            Param::Gen2TagEncoding,
            Param::Gen2Session,
            Param::Gen2Target,
            Param::ReadAsyncOffTime,
            Param::ReadAsyncOnTime,
            Param::ReadPlan,
            Param::RadioEnablePowerSave,
            Param::RadioPowerMax,
            Param::RadioPowerMin,
            Param::RadioPortReadPowerList,
            Param::RadioPortWritePowerList,
            Param::RadioReadPower,
            Param::RadioWritePower,
            Param::RadioTemperature,
            Param::TagReadDataRecordHighestRssi,
            Param::TagReadDataReportRssiInDbm,
            Param::TagReadDataUniqueByAntenna,
            Param::TagReadDataUniqueByData,
            Param::TagOpAntenna,
            Param::TagOpProtocol,
            Param::VersionHardware,
            Param::VersionSerial,
            Param::VersionModel,
            Param::VersionSoftware,
            Param::VersionSupportedProtocols,
            Param::RegionId,
            Param::RegionSupportedRegions,
            Param::RegionHopTable,
            Param::RegionHopTime,
            Param::RegionLbtEnable,
        ];
        for key in ALWAYS_PRESENT {
            self.param_present.set(key);
            self.param_confirmed.set(key);
        }
    }

    /// Lists the keys the connected firmware supports, probing any that have
    /// not been touched yet.
    pub async fn param_list(&mut self) -> Result<Vec<Param>> {
        let mut present = Vec::new();
        for key in Param::ALL {
            if !self.param_confirmed.get(key) {
                let _ = self.param_get(key).await;
            }
            if self.param_present.get(key) {
                present.push(key);
            }
        }
        Ok(present)
    }

    /// Reads a parameter, probing its presence on first touch.
    pub async fn param_get(&mut self, key: Param) -> Result<ParamValue> {
        if self.param_confirmed.get(key) && !self.param_present.get(key) {
            return Err(ReaderError::NotFound);
        }

        let result = self.param_get_inner(key).await;

        if !self.param_confirmed.get(key) {
            if result.is_ok() {
                self.param_present.set(key);
            }
            self.param_confirmed.set(key);
        }

        result
    }

    /// Writes a parameter, probing its presence on first touch.
    pub async fn param_set(&mut self, key: Param, value: ParamValue) -> Result<()> {
        if !self.param_confirmed.get(key) {
            let _ = self.param_get(key).await;
        }
        if self.param_confirmed.get(key) && !self.param_present.get(key) {
            return Err(ReaderError::NotFound);
        }

        self.param_set_inner(key, value).await
    }

    async fn param_get_inner(&mut self, key: Param) -> Result<ParamValue> {
        match key {
            Param::BaudRate => Ok(ParamValue::U32(self.baud_rate)),
            Param::CommandTimeout => Ok(ParamValue::U32(self.command_timeout_ms)),
            Param::TransportTimeout => Ok(ParamValue::U32(self.transport_timeout_ms)),
            Param::RegionId => Ok(ParamValue::Region(self.region)),
            Param::ReadAsyncOnTime => Ok(ParamValue::U32(self.async_on_time_ms)),
            Param::ReadAsyncOffTime => Ok(ParamValue::U32(self.async_off_time_ms)),
            Param::Gen2AccessPassword => Ok(ParamValue::U32(self.gen2_access_password)),
            Param::Gen2WriteMode => Ok(ParamValue::Gen2WriteMode(self.write_mode)),
            Param::ReadPlan => Ok(ParamValue::ReadPlan(self.read_plan.clone())),
            Param::TagOpAntenna => Ok(ParamValue::U8(self.tag_op_params.antenna)),
            Param::TagOpProtocol => Ok(ParamValue::Protocol(self.tag_op_params.protocol)),

            Param::PowerMode => {
                if self.connected {
                    let mode = self.cmd_get_power_mode().await?;
                    self.power_mode = mode;
                }
                Ok(ParamValue::PowerMode(self.power_mode))
            }
            Param::UserMode => Ok(ParamValue::UserMode(self.cmd_get_user_mode().await?)),

            Param::RadioEnablePowerSave => {
                self.get_config_bool(CONFIGURATION_TRANSMIT_POWER_SAVE).await
            }
            Param::AntennaCheckPort => {
                self.get_config_bool(CONFIGURATION_SAFETY_ANTENNA_CHECK).await
            }
            Param::TagReadDataRecordHighestRssi => {
                self.get_config_bool(CONFIGURATION_RECORD_HIGHEST_RSSI).await
            }
            Param::TagReadDataReportRssiInDbm => {
                self.get_config_bool(CONFIGURATION_RSSI_IN_DBM).await
            }
            Param::TagReadDataUniqueByAntenna => {
                self.get_config_bool(CONFIGURATION_UNIQUE_BY_ANTENNA).await
            }
            Param::TagReadDataUniqueByData => {
                self.get_config_bool(CONFIGURATION_UNIQUE_BY_DATA).await
            }

            Param::RadioPowerMax => {
                let power = self.cmd_get_read_tx_power_with_limits().await?;
                Ok(ParamValue::U16(power.max_power))
            }
            Param::RadioPowerMin => {
                let power = self.cmd_get_read_tx_power_with_limits().await?;
                Ok(ParamValue::U16(power.min_power))
            }
            Param::RadioReadPower => Ok(ParamValue::U16(self.cmd_get_read_tx_power().await?)),
            Param::RadioWritePower => Ok(ParamValue::U16(self.cmd_get_write_tx_power().await?)),
            Param::RadioTemperature => Ok(ParamValue::U8(self.cmd_get_temperature().await?)),

            Param::AntennaPortSwitchGpos => {
                let value = self
                    .cmd_get_reader_configuration(CONFIGURATION_ANTENNA_CONTROL_GPIO)
                    .await?;
                let mask = match value {
                    ConfigValue::U8(mask) => mask,
                    ConfigValue::Bool(_) => {
                        return Err(ReaderError::Parse("unexpected configuration value".into()))
                    }
                };
                let mut list = Vec::new();
                if mask & 1 != 0 {
                    list.push(1);
                }
                if mask & 2 != 0 {
                    list.push(2);
                }
                Ok(ParamValue::U8List(list))
            }

            Param::AntennaSettlingTimeList => {
                self.get_port_values(PortField::SettlingTime).await
            }
            Param::RadioPortReadPowerList => self.get_port_values(PortField::ReadPower).await,
            Param::RadioPortWritePowerList => self.get_port_values(PortField::WritePower).await,

            Param::GpioInputList => self.get_gpio_list(false).await,
            Param::GpioOutputList => self.get_gpio_list(true).await,

            Param::AntennaPortList => {
                let ports = self.cmd_antenna_detect().await?;
                Ok(ParamValue::U8List(ports.iter().map(|p| p.port).collect()))
            }
            Param::AntennaConnectedPortList => {
                let ports = self.cmd_antenna_detect().await?;
                Ok(ParamValue::U8List(
                    ports.iter().filter(|p| p.detected).map(|p| p.port).collect(),
                ))
            }
            Param::AntennaTxRxMap => Ok(ParamValue::AntennaMapList(self.tx_rx_map.clone())),

            Param::RegionHopTable => {
                Ok(ParamValue::U32List(self.cmd_get_frequency_hop_table().await?))
            }
            Param::RegionHopTime => Ok(ParamValue::U32(self.cmd_get_frequency_hop_time().await?)),
            Param::RegionLbtEnable => match self.cmd_get_region_lbt_enabled().await {
                Ok(enabled) => Ok(ParamValue::Bool(enabled)),
                // Older firmware rejects the query; report LBT off.
                Err(ReaderError::Reader(_)) => Ok(ParamValue::Bool(false)),
                Err(e) => Err(e),
            },
            Param::RegionSupportedRegions => {
                Ok(ParamValue::RegionList(self.cmd_get_available_regions().await?))
            }

            Param::Gen2Q => Ok(ParamValue::Gen2Q(self.cmd_get_gen2_q().await?)),
            Param::Gen2Session => Ok(ParamValue::Gen2Session(self.cmd_get_gen2_session().await?)),
            Param::Gen2Target => Ok(ParamValue::Gen2Target(self.cmd_get_gen2_target().await?)),
            Param::Gen2TagEncoding => Ok(ParamValue::Gen2TagEncoding(
                self.cmd_get_gen2_tag_encoding().await?,
            )),
            Param::Gen2Blf => Ok(ParamValue::U32(self.cmd_get_gen2_link_frequency().await?)),
            Param::Gen2Tari => Ok(ParamValue::Gen2Tari(self.cmd_get_gen2_tari().await?)),
            Param::Iso180006bBlf => Ok(ParamValue::U32(
                self.cmd_get_iso180006b_link_frequency().await?,
            )),

            Param::VersionSupportedProtocols => Ok(ParamValue::ProtocolList(
                self.cmd_get_available_protocols().await?,
            )),
            Param::VersionModel => {
                let model = match self.version_info.hardware[0] {
                    MODEL_M5E => "M5e",
                    MODEL_M5E_COMPACT => "M5e Compact",
                    MODEL_M5E_EU => "M5e EU",
                    MODEL_M4E => "M4e",
                    MODEL_M6E => "M6e",
                    _ => "Unknown",
                };
                Ok(ParamValue::String(model.to_string()))
            }
            Param::VersionSoftware => {
                let info = self.version_info;
                Ok(ParamValue::String(format!(
                    "{}-{}-BL{}",
                    hex_dotted_quad(&info.fw_version),
                    hex_dotted_quad(&info.fw_date),
                    hex_dotted_quad(&info.bootloader)
                )))
            }
            Param::VersionHardware => {
                let base = hex_dotted_quad(&self.version_info.hardware);
                match self.cmd_get_hardware_version(0, 0).await {
                    Ok(info) if !info.is_empty() => Ok(ParamValue::String(format!(
                        "{base}-{}",
                        encode_hex_upper(&info)
                    ))),
                    _ => Ok(ParamValue::String(base)),
                }
            }
            Param::VersionSerial => {
                let raw = self.cmd_get_hardware_version(0, 0x40).await?;
                if raw.len() < 4 {
                    return Err(ReaderError::Unimplemented);
                }
                let len = raw[3] as usize;
                if len > raw.len() - 4 {
                    return Err(ReaderError::Unimplemented);
                }
                let serial = raw[4..4 + len]
                    .iter()
                    .map(|b| *b as char)
                    .collect::<String>();
                Ok(ParamValue::String(serial))
            }
        }
    }

    async fn param_set_inner(&mut self, key: Param, value: ParamValue) -> Result<()> {
        match (key, value) {
            (Param::RegionId, ParamValue::Region(region)) => {
                self.region = region;
                if self.connected {
                    self.cmd_set_region(region).await?;
                }
                Ok(())
            }

            (Param::BaudRate, ParamValue::U32(rate)) => {
                if self.connected {
                    self.cmd_set_baud_rate(rate).await?;
                    self.baud_rate = rate;
                    self.transport.set_baud_rate(rate).await?;
                } else {
                    self.baud_rate = rate;
                }
                Ok(())
            }

            (Param::CommandTimeout, ParamValue::U32(ms)) => {
                self.command_timeout_ms = ms;
                Ok(())
            }
            (Param::TransportTimeout, ParamValue::U32(ms)) => {
                self.transport_timeout_ms = ms;
                Ok(())
            }
            (Param::ReadAsyncOnTime, ParamValue::U32(ms)) => {
                self.async_on_time_ms = ms;
                Ok(())
            }
            (Param::ReadAsyncOffTime, ParamValue::U32(ms)) => {
                self.async_off_time_ms = ms;
                Ok(())
            }
            (Param::Gen2AccessPassword, ParamValue::U32(password)) => {
                self.gen2_access_password = password;
                Ok(())
            }
            (Param::Gen2WriteMode, ParamValue::Gen2WriteMode(mode)) => {
                self.write_mode = mode;
                Ok(())
            }

            (Param::RadioEnablePowerSave, ParamValue::Bool(b)) => {
                self.cmd_set_reader_configuration_bool(CONFIGURATION_TRANSMIT_POWER_SAVE, b)
                    .await
            }
            (Param::AntennaCheckPort, ParamValue::Bool(b)) => {
                self.cmd_set_reader_configuration_bool(CONFIGURATION_SAFETY_ANTENNA_CHECK, b)
                    .await
            }
            (Param::TagReadDataRecordHighestRssi, ParamValue::Bool(b)) => {
                self.cmd_set_reader_configuration_bool(CONFIGURATION_RECORD_HIGHEST_RSSI, b)
                    .await
            }
            (Param::TagReadDataReportRssiInDbm, ParamValue::Bool(b)) => {
                self.cmd_set_reader_configuration_bool(CONFIGURATION_RSSI_IN_DBM, b)
                    .await
            }
            (Param::TagReadDataUniqueByAntenna, ParamValue::Bool(b)) => {
                self.cmd_set_reader_configuration_bool(CONFIGURATION_UNIQUE_BY_ANTENNA, b)
                    .await
            }
            (Param::TagReadDataUniqueByData, ParamValue::Bool(b)) => {
                self.cmd_set_reader_configuration_bool(CONFIGURATION_UNIQUE_BY_DATA, b)
                    .await
            }

            (Param::RadioReadPower, ParamValue::U16(power)) => {
                self.cmd_set_read_tx_power(power).await
            }
            (Param::RadioWritePower, ParamValue::U16(power)) => {
                self.cmd_set_write_tx_power(power).await
            }

            (Param::RadioPortReadPowerList, ParamValue::PortValueList(list)) => {
                self.set_port_values(PortField::ReadPower, &list).await
            }
            (Param::RadioPortWritePowerList, ParamValue::PortValueList(list)) => {
                self.set_port_values(PortField::WritePower, &list).await
            }
            (Param::AntennaSettlingTimeList, ParamValue::PortValueList(list)) => {
                self.set_port_values(PortField::SettlingTime, &list).await
            }

            (Param::AntennaPortSwitchGpos, ParamValue::U8List(list)) => {
                let mut mask = 0u8;
                for gpo in &list {
                    mask |= 1 << (gpo - 1);
                }
                self.cmd_set_reader_configuration(
                    CONFIGURATION_ANTENNA_CONTROL_GPIO,
                    ConfigValue::U8(mask),
                )
                .await?;
                // The GPIO-switched ports change the physical port space.
                self.init_tx_rx_map_from_ports().await
            }

            (Param::AntennaTxRxMap, ParamValue::AntennaMapList(map)) => {
                if map.len() > MAX_ANTENNA_PORTS {
                    return Err(ReaderError::TooBig);
                }
                let has_port = |port: u8| self.port_mask & (1 << (port - 1)) != 0;
                for entry in &map {
                    if !has_port(entry.tx_port) || !has_port(entry.rx_port) {
                        return Err(ReaderError::NoAntenna);
                    }
                }
                self.tx_rx_map = map;
                Ok(())
            }

            (Param::RegionHopTable, ParamValue::U32List(table)) => {
                self.cmd_set_frequency_hop_table(&table).await
            }
            (Param::RegionHopTime, ParamValue::U32(time)) => {
                self.cmd_set_frequency_hop_time(time).await
            }
            (Param::RegionLbtEnable, ParamValue::Bool(enable)) => {
                // Setting LBT re-enters the region, which resets the hop
                // table; save it across the change.
                let table = self.cmd_get_frequency_hop_table().await?;
                let region = self.region;
                self.cmd_set_region_lbt(region, enable).await?;
                self.cmd_set_frequency_hop_table(&table).await
            }

            (Param::TagOpAntenna, ParamValue::U8(antenna)) => {
                let entry = self
                    .tx_rx_map
                    .iter()
                    .find(|e| e.antenna == antenna)
                    .copied();
                match entry {
                    Some(entry) => {
                        self.tag_op_params.antenna = antenna;
                        self.cmd_set_tx_rx_ports(entry.tx_port, entry.rx_port).await
                    }
                    None => Err(ReaderError::NoAntenna),
                }
            }
            (Param::TagOpProtocol, ParamValue::Protocol(protocol)) => {
                if !protocol.supported_in(self.version_info.protocols) {
                    return Err(ReaderError::Unsupported);
                }
                self.tag_op_params.protocol = protocol;
                Ok(())
            }

            (Param::ReadPlan, ParamValue::ReadPlan(plan)) => {
                if !self.validate_read_plan(&plan) {
                    return Err(ReaderError::Invalid("read plan"));
                }
                self.read_plan = plan;
                Ok(())
            }

            (Param::GpioInputList, ParamValue::U8List(list)) => {
                self.set_gpio_directions(false, &list).await
            }
            (Param::GpioOutputList, ParamValue::U8List(list)) => {
                self.set_gpio_directions(true, &list).await
            }

            (
                Param::RadioPowerMax
                | Param::RadioPowerMin
                | Param::RegionSupportedRegions
                | Param::AntennaPortList
                | Param::AntennaConnectedPortList
                | Param::VersionSupportedProtocols
                | Param::RadioTemperature
                | Param::VersionHardware
                | Param::VersionSerial
                | Param::VersionModel
                | Param::VersionSoftware,
                _,
            ) => Err(ReaderError::ReadOnly),

            (Param::PowerMode, ParamValue::PowerMode(mode)) => {
                if self.connected {
                    self.cmd_set_power_mode(mode).await?;
                }
                self.power_mode = mode;
                Ok(())
            }
            (Param::UserMode, ParamValue::UserMode(mode)) => self.cmd_set_user_mode(mode).await,

            (Param::Gen2Q, ParamValue::Gen2Q(q)) => {
                self.cmd_set_gen2_configuration(Gen2Configuration::Q(q)).await
            }
            (Param::Gen2Session, ParamValue::Gen2Session(session)) => {
                self.cmd_set_gen2_configuration(Gen2Configuration::Session(session))
                    .await
            }
            (Param::Gen2Target, ParamValue::Gen2Target(target)) => {
                self.cmd_set_gen2_configuration(Gen2Configuration::Target(target))
                    .await
            }
            (Param::Gen2TagEncoding, ParamValue::Gen2TagEncoding(encoding)) => {
                self.cmd_set_gen2_configuration(Gen2Configuration::TagEncoding(encoding))
                    .await
            }
            (Param::Gen2Blf, ParamValue::U32(khz)) => {
                self.cmd_set_gen2_configuration(Gen2Configuration::LinkFrequency(khz))
                    .await
            }
            (Param::Gen2Tari, ParamValue::Gen2Tari(tari)) => {
                self.cmd_set_gen2_configuration(Gen2Configuration::Tari(tari))
                    .await
            }
            (Param::Iso180006bBlf, ParamValue::U32(khz)) => {
                self.cmd_set_iso180006b_link_frequency(khz).await
            }

            (
                Param::BaudRate
                | Param::CommandTimeout
                | Param::TransportTimeout
                | Param::PowerMode
                | Param::UserMode
                | Param::AntennaCheckPort
                | Param::AntennaPortSwitchGpos
                | Param::AntennaSettlingTimeList
                | Param::AntennaTxRxMap
                | Param::GpioInputList
                | Param::GpioOutputList
                | Param::Gen2AccessPassword
                | Param::Gen2Q
                | Param::Gen2TagEncoding
                | Param::Gen2Session
                | Param::Gen2Target
                | Param::Gen2Blf
                | Param::Gen2Tari
                | Param::Gen2WriteMode
                | Param::Iso180006bBlf
                | Param::ReadAsyncOffTime
                | Param::ReadAsyncOnTime
                | Param::ReadPlan
                | Param::RadioEnablePowerSave
                | Param::RadioPortReadPowerList
                | Param::RadioPortWritePowerList
                | Param::RadioReadPower
                | Param::RadioWritePower
                | Param::TagReadDataRecordHighestRssi
                | Param::TagReadDataReportRssiInDbm
                | Param::TagReadDataUniqueByAntenna
                | Param::TagReadDataUniqueByData
                | Param::TagOpAntenna
                | Param::TagOpProtocol
                | Param::RegionId
                | Param::RegionHopTable
                | Param::RegionHopTime
                | Param::RegionLbtEnable,
                _,
            ) => Err(ReaderError::Invalid("parameter value type")),
        }
    }

    async fn get_config_bool(&mut self, config_key: u8) -> Result<ParamValue> {
        match self.cmd_get_reader_configuration(config_key).await? {
            ConfigValue::Bool(b) => Ok(ParamValue::Bool(b)),
            ConfigValue::U8(_) => Err(ReaderError::Parse("unexpected configuration value".into())),
        }
    }

    /// Reads the per-port list for one field, skipping zero entries.
    async fn get_port_values(&mut self, field: PortField) -> Result<ParamValue> {
        let ports = self.cmd_get_antenna_port_powers_and_settling_time().await?;
        Ok(ParamValue::PortValueList(
            ports
                .iter()
                .filter(|p| field.get(p) != 0)
                .map(|p| PortValue {
                    port: p.port,
                    value: field.get(p),
                })
                .collect(),
        ))
    }

    /// Writes the per-port list for one field, leaving the other fields as
    /// the module reports them. Ports not mentioned get zero.
    async fn set_port_values(&mut self, field: PortField, list: &[PortValue]) -> Result<()> {
        let mut ports = self.cmd_get_antenna_port_powers_and_settling_time().await?;

        for port in ports.iter_mut() {
            field.set(port, 0);
        }
        for item in list {
            match ports.iter_mut().find(|p| p.port == item.port) {
                Some(port) => field.set(port, item.value),
                None => {
                    if ports.len() == MAX_ANTENNA_PORTS {
                        return Err(ReaderError::TooBig);
                    }
                    let mut port = PortPowerAndSettlingTime {
                        port: item.port,
                        ..PortPowerAndSettlingTime::default()
                    };
                    field.set(&mut port, item.value);
                    ports.push(port);
                }
            }
        }
        self.cmd_set_antenna_port_powers_and_settling_time(&ports).await
    }

    /// M6e pins have configurable direction; list the pins currently set the
    /// requested way. Older modules report the fixed input pair.
    async fn get_gpio_list(&mut self, want_output: bool) -> Result<ParamValue> {
        if self.version_info.hardware[0] != MODEL_M6E {
            return Ok(ParamValue::U8List(vec![1, 2]));
        }

        if self.gpio_directions.is_none() {
            let mut directions = 0u8;
            for pin in 1..=4u8 {
                if self.cmd_get_gpio_direction(pin).await? {
                    directions |= 1 << pin;
                }
            }
            self.gpio_directions = Some(directions);
        }

        let directions = self.gpio_directions.unwrap_or(0);
        let mut list = Vec::new();
        for pin in 1..=4u8 {
            if ((directions >> pin) & 1 == 1) == want_output {
                list.push(pin);
            }
        }
        Ok(ParamValue::U8List(list))
    }

    /// Rewrites only the pins whose direction actually changes from the
    /// cached state.
    async fn set_gpio_directions(&mut self, output_list: bool, pins: &[u8]) -> Result<()> {
        if self.version_info.hardware[0] != MODEL_M6E {
            return Err(ReaderError::ReadOnly);
        }

        let mut new_directions: u8 = if output_list { 0 } else { 0x1E };
        for pin in pins {
            new_directions ^= 1 << pin;
        }

        for pin in 1..=4u8 {
            let bit = 1 << pin;
            let changed = match self.gpio_directions {
                None => true,
                Some(old) => old & bit != new_directions & bit,
            };
            if changed {
                self.cmd_set_gpio_direction(pin, new_directions & bit != 0)
                    .await?;
            }
        }
        self.gpio_directions = Some(new_directions);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for key in Param::ALL {
            assert_eq!(Param::from_name(key.name()), Some(key));
        }
    }

    #[test]
    fn bitset_tracks_individual_keys() {
        let mut set = ParamBitSet::default();
        assert!(!set.get(Param::Gen2Q));
        set.set(Param::Gen2Q);
        set.set(Param::RegionLbtEnable);
        assert!(set.get(Param::Gen2Q));
        assert!(set.get(Param::RegionLbtEnable));
        assert!(!set.get(Param::BaudRate));
    }
}

//! M5e/M6e Serial Protocol Constants
//!
//! This module defines the wire-level constants of the ThingMagic serial
//! command set: opcodes, option bytes, flag bits and the fixed tables the
//! driver shares with the module firmware.

/// Start-of-frame byte for every request and response.
pub const SOF: u8 = 0xFF;

/// Maximum size of a single framed message, including SOF and CRC.
pub const MAX_PACKET_SIZE: usize = 256;

/// Maximum number of physical antenna ports on any supported module.
pub const MAX_ANTENNA_PORTS: usize = 16;

/// Maximum EPC length the driver stores, in bytes.
pub const MAX_EPC_BYTE_COUNT: usize = 62;

/// Maximum number of sub-plans in one multi-protocol search command.
pub const MAX_SERIAL_MULTIPROTOCOL_LENGTH: usize = 8;

/// Baud rates probed during connect, after the user-configured rate.
pub const BAUD_FALLBACK_RATES: [u32; 8] = [
    9600, 115200, 921600, 19200, 38400, 57600, 230400, 460800,
];

/// Highest rate the bootloader supports during a firmware load.
pub const BOOTLOADER_MAX_BAUD: u32 = 115_200;

// ----------------------------------------------------------------------------
// Command opcodes
// ----------------------------------------------------------------------------

pub const OPCODE_WRITE_FLASH: u8 = 0x01;
pub const OPCODE_READ_FLASH: u8 = 0x02;
pub const OPCODE_VERSION: u8 = 0x03;
pub const OPCODE_BOOT_FIRMWARE: u8 = 0x04;
pub const OPCODE_SET_BAUD_RATE: u8 = 0x06;
pub const OPCODE_ERASE_FLASH: u8 = 0x07;
pub const OPCODE_BOOT_BOOTLOADER: u8 = 0x09;
pub const OPCODE_GET_CURRENT_PROGRAM: u8 = 0x0C;
pub const OPCODE_WRITE_FLASH_SECTOR: u8 = 0x0D;
pub const OPCODE_HW_VERSION: u8 = 0x10;

pub const OPCODE_READ_TAG_ID_SINGLE: u8 = 0x21;
pub const OPCODE_READ_TAG_ID_MULTIPLE: u8 = 0x22;
pub const OPCODE_WRITE_TAG_ID: u8 = 0x23;
pub const OPCODE_WRITE_TAG_DATA: u8 = 0x24;
pub const OPCODE_LOCK_TAG: u8 = 0x25;
pub const OPCODE_KILL_TAG: u8 = 0x26;
pub const OPCODE_READ_TAG_DATA: u8 = 0x28;
pub const OPCODE_GET_TAG_ID_BUFFER: u8 = 0x29;
pub const OPCODE_CLEAR_TAG_ID_BUFFER: u8 = 0x2A;
/// Chip-type-specific write; carries Gen2 BlockWrite.
pub const OPCODE_WRITE_TAG_SPECIFIC: u8 = 0x2D;
/// Chip-type-specific erase/lock; carries Gen2 BlockPermaLock.
pub const OPCODE_ERASE_BLOCK_TAG_SPECIFIC: u8 = 0x2E;
pub const OPCODE_MULTI_PROTOCOL_TAG_OP: u8 = 0x2F;

pub const OPCODE_GET_ANTENNA_PORT: u8 = 0x61;
pub const OPCODE_GET_READ_TX_POWER: u8 = 0x62;
pub const OPCODE_GET_TAG_PROTOCOL: u8 = 0x63;
pub const OPCODE_GET_WRITE_TX_POWER: u8 = 0x64;
pub const OPCODE_GET_FREQ_HOP_TABLE: u8 = 0x65;
pub const OPCODE_GET_USER_GPIO_INPUTS: u8 = 0x66;
pub const OPCODE_GET_REGION: u8 = 0x67;
pub const OPCODE_GET_POWER_MODE: u8 = 0x68;
pub const OPCODE_GET_USER_MODE: u8 = 0x69;
pub const OPCODE_GET_READER_OPTIONAL_PARAMS: u8 = 0x6A;
pub const OPCODE_GET_PROTOCOL_PARAM: u8 = 0x6B;
pub const OPCODE_GET_USER_PROFILE: u8 = 0x6D;
pub const OPCODE_GET_AVAILABLE_PROTOCOLS: u8 = 0x70;
pub const OPCODE_GET_AVAILABLE_REGIONS: u8 = 0x71;
pub const OPCODE_GET_TEMPERATURE: u8 = 0x72;

pub const OPCODE_SET_ANTENNA_PORT: u8 = 0x91;
pub const OPCODE_SET_READ_TX_POWER: u8 = 0x92;
pub const OPCODE_SET_TAG_PROTOCOL: u8 = 0x93;
pub const OPCODE_SET_WRITE_TX_POWER: u8 = 0x94;
pub const OPCODE_SET_FREQ_HOP_TABLE: u8 = 0x95;
pub const OPCODE_SET_USER_GPIO_OUTPUTS: u8 = 0x96;
pub const OPCODE_SET_REGION: u8 = 0x97;
pub const OPCODE_SET_POWER_MODE: u8 = 0x98;
pub const OPCODE_SET_USER_MODE: u8 = 0x99;
pub const OPCODE_SET_READER_OPTIONAL_PARAMS: u8 = 0x9A;
pub const OPCODE_SET_PROTOCOL_PARAM: u8 = 0x9B;
pub const OPCODE_SET_USER_PROFILE: u8 = 0x9D;
pub const OPCODE_SET_PROTOCOL_LICENSEKEY: u8 = 0x9E;

// ----------------------------------------------------------------------------
// Gen2 singulation option byte
// ----------------------------------------------------------------------------

pub const GEN2_SINGULATION_SELECT_DISABLED: u8 = 0x00;
pub const GEN2_SINGULATION_SELECT_ON_EPC: u8 = 0x01;
pub const GEN2_SINGULATION_SELECT_ON_TID: u8 = 0x02;
pub const GEN2_SINGULATION_SELECT_ON_USER_MEM: u8 = 0x03;
pub const GEN2_SINGULATION_SELECT_ON_ADDRESSED_EPC: u8 = 0x04;
pub const GEN2_SINGULATION_USE_PASSWORD: u8 = 0x05;
pub const GEN2_SINGULATION_INVERSE_SELECT_BIT: u8 = 0x08;
pub const GEN2_SINGULATION_FLAG_METADATA: u8 = 0x10;
pub const GEN2_SINGULATION_EXTENDED_DATA_LENGTH: u8 = 0x20;

// ----------------------------------------------------------------------------
// Reader configuration keys (0x9A/0x6A key-value form)
// ----------------------------------------------------------------------------

pub const CONFIGURATION_UNIQUE_BY_ANTENNA: u8 = 0x00;
pub const CONFIGURATION_TRANSMIT_POWER_SAVE: u8 = 0x01;
pub const CONFIGURATION_EXTENDED_EPC: u8 = 0x02;
pub const CONFIGURATION_ANTENNA_CONTROL_GPIO: u8 = 0x03;
pub const CONFIGURATION_SAFETY_ANTENNA_CHECK: u8 = 0x04;
pub const CONFIGURATION_SAFETY_TEMPERATURE_CHECK: u8 = 0x05;
pub const CONFIGURATION_RECORD_HIGHEST_RSSI: u8 = 0x06;
pub const CONFIGURATION_UNIQUE_BY_DATA: u8 = 0x08;
pub const CONFIGURATION_RSSI_IN_DBM: u8 = 0x09;

// ----------------------------------------------------------------------------
// Gen2 protocol configuration subkeys (0x9B/0x6B)
// ----------------------------------------------------------------------------

pub const GEN2_CONFIGURATION_SESSION: u8 = 0x00;
pub const GEN2_CONFIGURATION_TARGET: u8 = 0x01;
pub const GEN2_CONFIGURATION_TAGENCODING: u8 = 0x02;
pub const GEN2_CONFIGURATION_LINKFREQUENCY: u8 = 0x10;
pub const GEN2_CONFIGURATION_TARI: u8 = 0x11;
pub const GEN2_CONFIGURATION_Q: u8 = 0x12;

pub const ISO180006B_CONFIGURATION_LINKFREQUENCY: u8 = 0x10;

// ----------------------------------------------------------------------------
// ISO 18000-6B command bytes
// ----------------------------------------------------------------------------

pub const ISO180006B_COMMAND_DATA_READ: u8 = 0x52;
pub const ISO180006B_COMMAND_READ: u8 = 0x0C;
pub const ISO180006B_COMMAND_WRITE: u8 = 0x0D;
pub const ISO180006B_COMMAND_WRITE4BYTE: u8 = 0x1B;
pub const ISO180006B_COMMAND_WRITE_MULTIPLE: u8 = 0x0E;
pub const ISO180006B_COMMAND_WRITE4BYTE_MULTIPLE: u8 = 0x1C;

pub const ISO180006B_WRITE_OPTION_READ_AFTER: u8 = 0x00;
pub const ISO180006B_WRITE_OPTION_NO_VERIFY: u8 = 0x01;
pub const ISO180006B_WRITE_OPTION_READ_VERIFY_AFTER: u8 = 0x02;
pub const ISO180006B_WRITE_OPTION_GROUP_SELECT: u8 = 0x03;
pub const ISO180006B_WRITE_OPTION_COUNT_PROVIDED: u8 = 0x08;
pub const ISO180006B_WRITE_LOCK_NO: u8 = 0x00;
pub const ISO180006B_WRITE_LOCK_YES: u8 = 0x01;
pub const ISO180006B_LOCK_OPTION_TYPE_FOLLOWS: u8 = 0x01;
pub const ISO180006B_LOCK_TYPE_QUERYLOCK_THEN_LOCK: u8 = 0x01;

// ----------------------------------------------------------------------------
// Hardware model identifiers (first byte of the hardware version)
// ----------------------------------------------------------------------------

pub const MODEL_M5E: u8 = 0x00;
pub const MODEL_M5E_COMPACT: u8 = 0x01;
pub const MODEL_M5E_EU: u8 = 0x02;
pub const MODEL_M4E: u8 = 0x03;
pub const MODEL_M6E: u8 = 0x18;

// ----------------------------------------------------------------------------
// Firmware image handling
// ----------------------------------------------------------------------------

/// Magic header at the start of every firmware image file.
pub const FIRMWARE_MAGIC: [u8; 12] = [
    0x54, 0x4D, 0x2D, 0x53, 0x50, 0x61, 0x69, 0x6B, 0x00, 0x00, 0x00, 0x02,
];

/// Password for erasing application flash (sector 2).
pub const FLASH_ERASE_PASSWORD: u32 = 0x0895_9121;

/// Password for writing application flash (sector 2).
pub const FLASH_WRITE_PASSWORD: u32 = 0x0225_4410;

/// Flash sector holding the application image.
pub const FLASH_APP_SECTOR: u8 = 2;

/// Page size used when streaming an image into flash.
pub const FLASH_PAGE_SIZE: usize = 240;

// ----------------------------------------------------------------------------
// User profile command bytes (0x9D)
// ----------------------------------------------------------------------------

pub const USER_PROFILE_OPTION_SAVE: u8 = 0x01;
pub const USER_PROFILE_OPTION_RESTORE: u8 = 0x02;
pub const USER_PROFILE_OPTION_VERIFY: u8 = 0x03;
pub const USER_PROFILE_OPTION_CLEAR: u8 = 0x04;
pub const USER_PROFILE_KEY_ALL: u8 = 0x01;
pub const USER_PROFILE_VALUE_FIRMWARE_DEFAULT: u8 = 0x00;
pub const USER_PROFILE_VALUE_CUSTOM: u8 = 0x01;

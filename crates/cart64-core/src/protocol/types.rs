//! Memory bank and CIC enumerations.

use std::fmt;

use super::constants::CIC_APPLY_FLAG;

/// An addressable memory region on the cartridge, selected per transfer.
///
/// The id is packed into the high byte of the size parameter of a
/// LOADRAM/DUMPRAM command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Bank {
    /// Cartridge ROM.
    CartRom = 1,
    /// 256 Kbit SRAM save.
    Sram256 = 2,
    /// 768 Kbit SRAM save (only used by Dezaemon 3D).
    Sram768 = 3,
    /// 1 Mbit FlashRAM save.
    FlashRam1M = 4,
    /// 1 Mbit FlashRAM, Pokémon Stadium 2 special case.
    FlashPkm1M = 5,
    /// 16 Kbit EEPROM save.
    Eeprom16 = 6,
}

impl Bank {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Bank::CartRom),
            2 => Some(Bank::Sram256),
            3 => Some(Bank::Sram768),
            4 => Some(Bank::FlashRam1M),
            5 => Some(Bank::FlashPkm1M),
            6 => Some(Bank::Eeprom16),
            _ => None,
        }
    }
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Bank::CartRom => "rom",
            Bank::Sram256 => "sram256",
            Bank::Sram768 => "sram768",
            Bank::FlashRam1M => "flash",
            Bank::FlashPkm1M => "pokemon",
            Bank::Eeprom16 => "eeprom",
        };
        write!(f, "{name}")
    }
}

/// CIC boot-chip identity the device emulates for a game to boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Cic {
    Cic6101 = 0,
    Cic6102 = 1,
    Cic7101 = 2,
    Cic7102 = 3,
    /// Covers 6103 and 7103.
    CicX103 = 4,
    /// Covers 6105 and 7105.
    CicX105 = 5,
    /// Covers 6106 and 7106.
    CicX106 = 6,
    /// Aleck64.
    Cic5101 = 7,
}

impl Cic {
    pub const ALL: [Cic; 8] = [
        Cic::Cic6101,
        Cic::Cic6102,
        Cic::Cic7101,
        Cic::Cic7102,
        Cic::CicX103,
        Cic::CicX105,
        Cic::CicX106,
        Cic::Cic5101,
    ];

    pub fn id(self) -> u32 {
        self as u32
    }

    /// The user-facing chip number.
    pub fn number(self) -> u32 {
        match self {
            Cic::Cic6101 => 6101,
            Cic::Cic6102 => 6102,
            Cic::Cic7101 => 7101,
            Cic::Cic7102 => 7102,
            Cic::CicX103 => 103,
            Cic::CicX105 => 105,
            Cic::CicX106 => 106,
            Cic::Cic5101 => 5101,
        }
    }

    /// Look up by chip number. Bare internal ids (0..=7) are also accepted,
    /// matching the numbering the Windows tool uses.
    pub fn from_number(number: u32) -> Option<Self> {
        Cic::ALL
            .into_iter()
            .find(|cic| cic.number() == number)
            .or_else(|| match number {
                0 => Some(Cic::Cic6101),
                1 => Some(Cic::Cic6102),
                2 => Some(Cic::Cic7101),
                3 => Some(Cic::Cic7102),
                4 => Some(Cic::CicX103),
                5 => Some(Cic::CicX105),
                6 => Some(Cic::CicX106),
                7 => Some(Cic::Cic5101),
                _ => None,
            })
    }

    /// The SETCIC request parameter: the apply flag OR'd with the id.
    pub fn request_param(self) -> u32 {
        CIC_APPLY_FLAG | self.id()
    }
}

impl fmt::Display for Cic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

use crc::{Crc, CRC_16_XMODEM, CRC_32_ISCSI};

/// CRC-16/XMODEM, the checksum of user-friendly addresses
pub const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// CRC-32C (Castagnoli), the optional BoC trailer
pub const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Card capacity in 512-byte sectors, decoded from a CSD register.
///
/// Structure version 1 (SDHC/SDXC) stores C_SIZE in 512 KiB units; every
/// other structure uses the SDSC/MMC mantissa-exponent encoding.
pub(super) fn sector_count(csd: &[u8; 16]) -> Option<u32> {
    if csd_get_bits(csd, 127, 126) == 1 {
        let c_size = csd_get_bits(csd, 69, 48);
        return (c_size + 1).checked_mul(1024);
    }
    let c_size = csd_get_bits(csd, 73, 62);
    let c_size_mult = csd_get_bits(csd, 49, 47);
    let read_bl_len = csd_get_bits(csd, 83, 80);
    let shift = (read_bl_len + c_size_mult + 2).checked_sub(9)?;
    (c_size + 1).checked_shl(shift)
}

fn csd_get_bits(csd: &[u8; 16], msb: u8, lsb: u8) -> u32 {
    let mut value = 0u32;
    for bit in (lsb..=msb).rev() {
        let byte = csd[usize::from((127 - bit) / 8)];
        value = (value << 1) | u32::from((byte >> (bit % 8)) & 1);
    }
    value
}

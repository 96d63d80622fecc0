/// One byte of the Dallas/Maxim CRC-8 (reflected polynomial 0x8C), LSB first.
pub(crate) fn crc8_maxim_update(crc: u8, data: u8) -> u8 {
    let mut crc = crc;
    let mut d = data;
    for _ in 0..8 {
        let mix = (crc ^ d) & 0x01;
        crc >>= 1;
        if mix != 0 {
            crc ^= 0x8c;
        }
        d >>= 1;
    }
    crc
}

pub(crate) fn crc8_maxim(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |crc, &b| crc8_maxim_update(crc, b))
}

//! DUID-LL (RFC 3315 §9-2, §9.4): type 3 ("link-layer"), hardware type 1
//! (Ethernet), then the raw hardware address. Computed from the first
//! interface's hw-addr, matching dhclient's historical behavior of
//! preferring a link-layer DUID over the link-layer-plus-time variant.

const DUID_LL: u16 = 3;
const HTYPE_ETHERNET: u16 = 1;

/// Builds a DUID-LL from a 6-byte Ethernet hardware address.
pub fn duid_ll(hw_addr: &[u8; 6]) -> Vec<u8> {
    let mut duid = Vec::with_capacity(4 + hw_addr.len());
    duid.extend_from_slice(&DUID_LL.to_be_bytes());
    duid.extend_from_slice(&HTYPE_ETHERNET.to_be_bytes());
    duid.extend_from_slice(hw_addr);
    duid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_type_and_htype_then_hw_addr() {
        let hw = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];
        let duid = duid_ll(&hw);
        assert_eq!(duid, vec![0x00, 0x03, 0x00, 0x01, 0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
    }
}

//! Example filter processor: drops a packet's fan-out when its buffer
//! matches a configured sample. The resolved reading of the comparison
//! open question (§9) is used here: the comparison covers
//! `min(sample.len(), buffer.len())` bytes, never more than either side
//! actually holds.

use crate::metadata::Metadata;
use crate::processor::Processor;

pub struct FilterProcessor {
    sample: Vec<u8>,
}

impl FilterProcessor {
    pub fn new(sample: Vec<u8>) -> FilterProcessor {
        FilterProcessor { sample }
    }

    fn matches(&self, buffer: &[u8]) -> bool {
        let len = self.sample.len().min(buffer.len());
        self.sample[..len] == buffer[..len]
    }
}

impl Processor for FilterProcessor {
    fn process(&self, meta: &mut Metadata) {
        if self.matches(meta.packet().buffer()) {
            for i in 0..meta.client_count() {
                meta.mask_set(i, false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ClientDescriptor;
    use crate::packet::{Packet, PacketRef};

    fn meta_with_buffer(buffer: &[u8]) -> Metadata {
        let packet = PacketRef::new(Packet::new(
            1,
            1234,
            "udp-0".to_owned(),
            "127.0.0.1:9".parse().unwrap(),
            buffer.to_vec(),
        ));
        Metadata::new(
            packet,
            vec![ClientDescriptor {
                address: "10.0.0.1".parse().unwrap(),
                last_seen: 0,
                listener_id: 0,
                permanent: false,
            }],
        )
    }

    #[test]
    fn scenario_s1_drops_matching_payload() {
        let filter = FilterProcessor::new(b"HELLO".to_vec());
        let mut meta = meta_with_buffer(b"HELLO");
        filter.process(&mut meta);
        assert_eq!(meta.valid_count(), 0);
    }

    #[test]
    fn scenario_s2_passes_non_matching_payload() {
        let filter = FilterProcessor::new(b"HELLO".to_vec());
        let mut meta = meta_with_buffer(b"WORLD");
        filter.process(&mut meta);
        assert_eq!(meta.valid_count(), 1);
    }

    #[test]
    fn comparison_is_bounded_by_shorter_side() {
        let filter = FilterProcessor::new(b"HELLO-THIS-SAMPLE-IS-LONGER".to_vec());
        let mut meta = meta_with_buffer(b"HELLO");
        filter.process(&mut meta);
        assert_eq!(meta.valid_count(), 0, "sample longer than buffer still matches over the shared prefix");
    }

    #[test]
    fn buffer_longer_than_sample_still_compares_prefix() {
        let filter = FilterProcessor::new(b"HEL".to_vec());
        let mut meta = meta_with_buffer(b"HELLO");
        filter.process(&mut meta);
        assert_eq!(meta.valid_count(), 0);
    }
}

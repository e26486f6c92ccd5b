//! Property-based tests for the wire format and the class queues.
//!
//! Round-trip laws: parse(build(f, p)) == f and verify(build(f, p)) holds
//! for all valid fields; a ring fed any record sequence that fits hands the
//! identical sequence back in order; drop accounting always balances.

use proptest::prelude::*;

use agentring::{
    verify_record, Capabilities, MessageHeader, Priority, RecordBuilder, RingBuffer, RingConfig,
    HEADER_SIZE,
};

fn ring_config(capacity: usize) -> RingConfig {
    RingConfig::new(capacity).huge_pages(false).lock_memory(false)
}

fn arb_priority() -> impl Strategy<Value = Priority> {
    (0u32..6).prop_map(|p| Priority::from_u32(p).unwrap())
}

proptest! {
    /// parse(build(fields, payload)).fields == fields, and the CRC holds.
    #[test]
    fn prop_header_round_trip(
        priority in arb_priority(),
        msg_type in any::<u32>(),
        sequence in any::<u64>(),
        source_agent in any::<u32>(),
        targets in prop::collection::vec(any::<u32>(), 0..=16),
        metadata in any::<[u8; 16]>(),
        payload in prop::collection::vec(any::<u8>(), 0..1024),
    ) {
        let record = RecordBuilder::new(priority)
            .msg_type(msg_type)
            .sequence(sequence)
            .source_agent(source_agent)
            .targets(&targets).unwrap()
            .metadata(metadata)
            .build_vec(&payload)
            .unwrap();

        prop_assert_eq!(record.len(), HEADER_SIZE + payload.len());

        let header = MessageHeader::parse(&record).unwrap();
        prop_assert_eq!(header.priority, priority);
        prop_assert_eq!(header.msg_type, msg_type);
        prop_assert_eq!(header.sequence, sequence);
        prop_assert_eq!(header.source_agent, source_agent);
        prop_assert_eq!(header.target_count as usize, targets.len());
        prop_assert_eq!(&header.target_agents[..targets.len()], &targets[..]);
        prop_assert_eq!(header.metadata, metadata);
        prop_assert_eq!(header.payload_len as usize, payload.len());

        prop_assert!(header.verify_crc(&payload));
        prop_assert!(verify_record(&record).is_ok());
    }

    /// Any single bit flip in the CRC-covered bytes is detected.
    #[test]
    fn prop_crc_detects_single_bit_flip(
        payload in prop::collection::vec(any::<u8>(), 1..256),
        flip_bit in 0usize..8,
        seed in any::<u64>(),
    ) {
        let mut record = RecordBuilder::new(Priority::Normal)
            .sequence(seed)
            .build_vec(&payload)
            .unwrap();

        // Covered region: header[0..104] ++ payload. The CRC field itself
        // flipping is also a detectable mismatch.
        let covered: Vec<usize> = (0..104)
            .chain(108..112)
            .chain(HEADER_SIZE..record.len())
            .collect();
        let target = covered[(seed as usize) % covered.len()];
        record[target] ^= 1 << flip_bit;

        prop_assert!(verify_record(&record).is_err());
    }

    /// Writing then reading any fitting record sequence yields the
    /// identical sequence, in order.
    #[test]
    fn prop_ring_sequence_identity(
        lengths in prop::collection::vec(1usize..300, 1..20),
    ) {
        let caps = Capabilities::synthetic(1, 0);
        let rb = RingBuffer::create(ring_config(16 * 1024), &caps).unwrap();

        let records: Vec<Vec<u8>> = lengths
            .iter()
            .enumerate()
            .map(|(i, &len)| (0..len).map(|j| (i * 131 + j) as u8).collect())
            .collect();

        // Total (with prefixes) stays below capacity: 20 * 308 < 16 KiB.
        for record in &records {
            rb.write(Priority::High, record).unwrap();
        }
        for record in &records {
            let got = rb.read_vec(Priority::High).unwrap();
            prop_assert_eq!(&got, record);
        }
        prop_assert!(rb.is_empty());
    }

    /// successes + drops == attempts, and depth never exceeds capacity.
    #[test]
    fn prop_drop_accounting_balances(
        attempts in 1usize..100,
        record_len in 1usize..512,
    ) {
        let caps = Capabilities::synthetic(1, 0);
        let rb = RingBuffer::create(ring_config(4096), &caps).unwrap();
        let record = vec![0xC3u8; record_len];

        let mut successes = 0u64;
        for _ in 0..attempts {
            if rb.write(Priority::Background, &record).is_ok() {
                successes += 1;
            }
        }

        let stats = rb.stats();
        let idx = Priority::Background.index();
        prop_assert_eq!(stats.messages[idx], successes);
        prop_assert_eq!(stats.drops[idx] + successes, attempts as u64);
        prop_assert!(rb.queued_bytes(Priority::Background) <= 4096);
    }

    /// Interleaved writes and reads keep the queue depth consistent:
    /// enqueued - dequeued == depth, and reads return what writes put in.
    #[test]
    fn prop_interleaved_depth_consistent(
        ops in prop::collection::vec(any::<bool>(), 1..200),
    ) {
        let caps = Capabilities::synthetic(1, 0);
        let rb = RingBuffer::create(ring_config(2048), &caps).unwrap();

        let mut next_write = 0u8;
        let mut next_read = 0u8;
        let mut queued = 0u64;

        for write_op in ops {
            if write_op {
                if rb.write(Priority::Batch, &[next_write; 64]).is_ok() {
                    next_write = next_write.wrapping_add(1);
                    queued += 1;
                }
            } else if let Some(got) = rb.read_vec(Priority::Batch) {
                prop_assert_eq!(got, vec![next_read; 64]);
                next_read = next_read.wrapping_add(1);
                queued -= 1;
            }
            prop_assert_eq!(rb.queued_bytes(Priority::Batch), queued * (64 + 8));
        }
    }
}

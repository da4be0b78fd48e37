//! Property-based tests for invariants

use dqs_runtime::fc::{self, ZeroCopyParams};
use dqs_runtime::isa::{self, Opcode, BRANCH_SEQ_WORDS};
use dqs_runtime::kernel::StarsCmd;
use dqs_runtime::{DqsError, ErrorKind};
use proptest::prelude::*;

proptest! {
    /// Every command's ioctl request decodes back to the same command.
    #[test]
    fn prop_request_numbers_unique(idx in 0usize..StarsCmd::ALL.len()) {
        let cmd = StarsCmd::ALL[idx];
        prop_assert_eq!(StarsCmd::from_request(cmd.request()), Some(cmd));
    }

    /// Assembled programs only branch to instructions inside themselves.
    #[test]
    fn prop_zero_copy_branches_stay_in_program(
        count in 1u32..64,
        table in 0x1000u64..0xFFFF_FFFF_0000,
        low32_first in any::<bool>(),
    ) {
        let words = fc::zero_copy(&ZeroCopyParams {
            handle_addr: 0x4000,
            data_base_addr: 0x5000,
            block_size_addr: 0x6000,
            dest_table: table & !7,
            offset_table: (table + 0x800) & !7,
            count,
            low32_first,
        })
        .unwrap();
        prop_assert_eq!(*words.last().unwrap() & 0x7F, Opcode::Nop as u32);
        for br in isa::disassemble(&words).iter().filter(|d| d.opcode == Some(Opcode::Branch)) {
            let seq_start = br.index + 1 - BRANCH_SEQ_WORDS;
            let target = isa::branch_target(&words, seq_start).unwrap();
            prop_assert!(target < words.len());
        }
    }

    /// Resource errors map to the resource errno family.
    #[test]
    fn prop_errno_is_negative(size in any::<u64>(), device_id in any::<u32>()) {
        let err = DqsError::OutOfDeviceMemory { size, device_id };
        prop_assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        prop_assert!(err.to_errno() < 0);
    }
}

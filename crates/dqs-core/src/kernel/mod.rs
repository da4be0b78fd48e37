//! STARS control-node access.
//!
//! Everything that crosses the user/kernel boundary goes through
//! [`KernelChannel`]; the syscalls themselves sit behind [`KernelShim`].

mod channel;
pub mod layout;
pub mod shim;
pub mod sys;

pub use channel::KernelChannel;
pub use layout::{
    InputMbufCache, StarsDqsCtrlSpace, StarsDqsInterChipGroup, StarsDqsInterChipSpace,
    StarsSdmaPtrDescriptor, DQS_INTER_CHIP_GROUP_MAX, MBUF_CACHE_DEPTH, MBUF_LIST_LEN,
};
pub use shim::{KernelShim, RealKernelShim};
pub use sys::{StarsCmd, WireStruct, DQS_MAX_QUEUE_NUM, DQS_POOL_ID_MASK, QUEUE_BIND_MAX};

#[cfg(target_os = "android")]
pub(crate) const PTRACE_GETREGSET: i32 = 0x4204;

#[cfg(not(target_os = "android"))]
pub(crate) const PTRACE_GETREGSET: u32 = 0x4204;

#[cfg(target_os = "android")]
pub(crate) const PTRACE_SETREGSET: i32 = 0x4205;

#[cfg(not(target_os = "android"))]
pub(crate) const PTRACE_SETREGSET: u32 = 0x4205;

/// Linux constant defined in `include/uapi/linux/elf.h`.
pub(crate) const NT_PRSTATUS: i32 = 0x1;

/// Register state of a tracee, as read by `PTRACE_GETREGSET` with `NT_PRSTATUS`.
pub type Registers = user_pt_regs;

/// Defined in [`arch/arm64/include/uapi/asm/ptrace.h`](https://android.googlesource.com/kernel/common/+/refs/heads/android-mainline/arch/arm64/include/uapi/asm/ptrace.h#88).
#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct user_pt_regs {
    pub regs: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64
}

/// Return the program counter of `regs`.
pub fn program_counter(regs: &Registers) -> u64 {
    regs.pc
}

pub fn set_program_counter(regs: &mut Registers, pc: u64) {
    regs.pc = pc;
}

pub fn stack_pointer(regs: &Registers) -> u64 {
    regs.sp
}

/// Register state of a tracee, as read by `PTRACE_GETREGS`.
pub type Registers = libc::user_regs_struct;

/// Return the program counter of `regs`.
pub fn program_counter(regs: &Registers) -> u64 {
    regs.rip
}

pub fn set_program_counter(regs: &mut Registers, pc: u64) {
    regs.rip = pc;
}

pub fn stack_pointer(regs: &Registers) -> u64 {
    regs.rsp
}

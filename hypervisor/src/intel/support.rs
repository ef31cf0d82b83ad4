//! Thin wrappers around the privileged instructions used by the hooking engine.

/// Read a specified field from a VMCS.
pub fn vmread(field: u32) -> u64 {
    unsafe { x86::bits64::vmx::vmread(field) }.unwrap_or(0)
}

/// Write to a specified field in a VMCS.
pub fn vmwrite<T: Into<u64>>(field: u32, val: T)
where
    u64: From<T>,
{
    if unsafe { x86::bits64::vmx::vmwrite(field, u64::from(val)) }.is_err() {
        log::error!("VMWRITE to field {:#x} failed", field);
    }
}

/// Reads the CR3 register.
pub fn cr3() -> u64 {
    unsafe { x86::controlregs::cr3() }
}

/// Writes a value to the CR3 register.
pub fn cr3_write(val: u64) {
    unsafe { x86::controlregs::cr3_write(val) };
}

/// Reads 8-bits from an IO port.
pub fn inb(port: u16) -> u8 {
    unsafe { x86::io::inb(port) }
}

/// Writes 8-bits to an IO port.
pub fn outb(port: u16, val: u8) {
    unsafe { x86::io::outb(port, val) };
}

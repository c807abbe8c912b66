// src/monitor/commands.rs

//! Named wrappers for the fixed monitor commands.
//!
//! Each wrapper issues one command string through [`MonitorProtocol::send`]
//! and returns the raw reply body; only `VmState` interprets a reply.

use super::{MonitorProtocol, ProtocolError};

macro_rules! monitor_commands {
    ($( $(#[$doc:meta])* $method:ident => $command:literal; )*) => {
        impl MonitorProtocol {
            $(
                $(#[$doc])*
                pub fn $method(&self) -> Result<String, ProtocolError> {
                    self.send($command)
                }
            )*
        }

        /// Every wrapper as `(method, command)`.
        pub const COMMANDS: &[(&str, &str)] = &[ $( (stringify!($method), $command), )* ];
    };
}

monitor_commands! {
    /// Show the help.
    help => "help";
    /// Show the help of the info command.
    info_help => "info";
    /// Stop emulation.
    cmd_stop => "stop";
    /// Resume emulation.
    cmd_cont => "cont";
    /// Show the version of QEMU.
    info_version => "info version";
    /// List QMP available commands.
    info_commands => "info commands";
    /// Show the network state.
    info_network => "info network";
    /// Show the character devices.
    info_chardev => "info chardev";
    /// Show the block devices.
    info_block => "info block";
    /// Show block device statistics.
    info_blockstats => "info blockstats";
    /// Show the cpu registers.
    info_registers => "info registers";
    /// Show infos for each CPU.
    info_cpus => "info cpus";
    /// Show the command line history.
    info_history => "info history";
    /// Show the interrupts statistics (if available).
    info_irq => "info irq";
    /// Show i8259 (PIC) state.
    info_pic => "info pic";
    /// Show PCI info.
    info_pci => "info pci";
    /// Show virtual to physical memory mappings.
    info_tlb => "info tlb";
    /// Show the active virtual memory mappings.
    info_mem => "info mem";
    /// Show state of HPET.
    info_hpet => "info hpet";
    /// Show dynamic compiler info.
    info_jit => "info jit";
    /// Show KVM information.
    info_kvm => "info kvm";
    /// Show NUMA information.
    info_numa => "info numa";
    /// Show guest USB devices.
    info_usb => "info usb";
    /// Show host USB devices.
    info_usbhost => "info usbhost";
    /// Show profiling information.
    info_profile => "info profile";
    /// Show capture information.
    info_capture => "info capture";
    /// Show the currently saved VM snapshots.
    info_snapshots => "info snapshots";
    /// Show the current VM status (running|paused).
    info_status => "info status";
    /// Show guest PCMCIA status.
    info_pcmcia => "info pcmcia";
    /// Show which guest mouse is receiving events.
    info_mice => "info mice";
    /// Show the vnc server status.
    info_vnc => "info vnc";
    /// Show the current VM name.
    info_name => "info name";
    /// Show the current VM UUID.
    info_uuid => "info uuid";
    /// Show user network stack connection states.
    info_usernet => "info usernet";
    /// Show migration status.
    info_migrate => "info migrate";
    /// Show balloon information.
    info_balloon => "info balloon";
    /// Show device tree.
    info_qtree => "info qtree";
    /// Show qdev device model list.
    info_qdm => "info qdm";
    /// Show roms.
    info_roms => "info roms";
}

//! Tests for platform-agnostic types

use tether_core::types::{Address, LaunchFlags, LaunchInfo, ProcessId, RegisterSet, RegisterValue, SignalInfo, ThreadId};

#[test]
fn test_process_id_from_u32()
{
    let pid = ProcessId::from(12345);
    assert_eq!(pid.0, 12345);
}

#[test]
fn test_process_id_to_u32()
{
    let pid = ProcessId::from(54321);
    let value: u32 = pid.into();
    assert_eq!(value, 54321);
}

#[test]
fn test_main_thread_shares_pid()
{
    let pid = ProcessId(4242);
    assert_eq!(pid.main_thread(), ThreadId(4242));
    assert_eq!(ThreadId::from(pid), pid.main_thread());
    assert_eq!(pid.main_thread().as_pid(), pid.as_pid());
}

#[test]
fn test_thread_id_ordering()
{
    let mut threads = vec![ThreadId(30), ThreadId(10), ThreadId(20)];
    threads.sort();
    assert_eq!(threads, vec![ThreadId(10), ThreadId(20), ThreadId(30)]);
    assert_eq!(ThreadId(10).raw(), 10);
}

#[test]
fn test_address_word_alignment()
{
    let addr = Address::new(0x1003);
    assert_eq!(addr.align_down(8), Address::new(0x1000));
    assert_eq!(addr.offset_in(8), 3);
    assert_eq!(Address::new(0x1008).offset_in(8), 0);
}

#[test]
fn test_address_arithmetic()
{
    let addr = Address::from(0x1000);
    assert_eq!(addr.checked_add(0x10), Some(Address::new(0x1010)));
    assert_eq!(Address::new(u64::MAX).checked_add(1), None);
    assert_eq!(Address::ZERO.checked_sub(1), None);
    assert_eq!(Address::new(u64::MAX).saturating_add(5), Address::new(u64::MAX));
    assert_eq!(format!("{}", Address::new(0xdead)), "0x000000000000dead");
    assert_eq!(u64::from(addr), 0x1000);
}

#[test]
fn test_register_set_note_types()
{
    assert_eq!(RegisterSet::General.note_type(), 1);
    assert_eq!(RegisterSet::FloatingPoint.note_type(), 2);
    assert_eq!(RegisterSet::from_note_type(0x202), RegisterSet::Extended(0x202));
    assert_eq!(RegisterSet::General.to_string(), "general-purpose");
}

#[test]
fn test_register_value_from_word()
{
    let value = RegisterValue::from_word(0x1122_3344_5566_7788, 4);
    assert_eq!(value.len(), 4);
    assert_eq!(value.as_bytes(), &[0x88, 0x77, 0x66, 0x55]);
    assert_eq!(value.to_u64(), 0x5566_7788);

    let wide = RegisterValue::from_bytes(&[0xff; 16]);
    assert_eq!(wide.len(), 16);
    assert_eq!(wide.to_u64(), u64::MAX);
    assert!(!wide.is_empty());
}

#[test]
fn test_signal_info_builders()
{
    let info = SignalInfo::new(libc::SIGSEGV, 1)
        .with_fault_address(Address::new(0x10))
        .with_errno(0);
    assert_eq!(info.signo, libc::SIGSEGV);
    assert_eq!(info.fault_address, Some(Address::new(0x10)));
    assert_eq!(info.sender_pid, None);

    let sent = SignalInfo::new(libc::SIGUSR1, 0).with_sender(99);
    assert_eq!(sent.sender_pid, Some(99));
}

#[test]
fn test_launch_info_defaults_argv0_to_program()
{
    let info = LaunchInfo::new("/bin/true");
    assert_eq!(info.argv().len(), 1);
    assert_eq!(info.argv()[0], "/bin/true");
    assert!(info.uses_terminal());
    assert!(info.environment().is_none());
    assert_eq!(info.launch_flags(), LaunchFlags::default());
}

#[test]
fn test_launch_info_fully_redirected_needs_no_terminal()
{
    let info = LaunchInfo::new("/bin/cat")
        .arg("-")
        .stdin("/dev/null")
        .stdout("/tmp/out")
        .stderr("/tmp/err")
        .flags(LaunchFlags { disable_aslr: true });

    assert!(!info.uses_terminal());
    assert!(info.launch_flags().disable_aslr);
    assert_eq!(info.argv().len(), 2);
}

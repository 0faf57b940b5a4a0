//! Linux kernel command-line construction (spec §4.6 "Linux args processing").

const REQUIRED_FLAGS: &[&str] = &[
    "rw",
    "loglevel=2",
    "intel_idle.max_cstate=0",
    "processor.max_cstate=1",
    "console=ttyS0,115200",
    "console=tty0",
];

const FIXED_TAIL: &str =
    "i8042.noaux i8042.nomux i8042.nopnp i8042.dumbkbd vt.color=0x00";

/// Splits `existing` shell-style (no env expansion, no backticks — plain
/// word splitting with quote handling), appends any of the required flags
/// that are missing, sets `init=` and `root=`, and appends the fixed
/// literal tail. Arguments containing whitespace are re-quoted on output.
pub fn build_linux_args(
    existing: &str,
    part2_uuid: &str,
    init: &str,
) -> crate::Result<String> {
    let mut words = shell_words::split(existing)
        .map_err(|e| crate::VorteilError::InvalidInput(format!("invalid kernel args: {e}")))?;

    for flag in REQUIRED_FLAGS {
        let present = words.iter().any(|w| w == flag);
        if !present {
            words.push((*flag).to_string());
        }
    }

    words.retain(|w| !w.starts_with("init="));
    words.push(format!("init={init}"));

    words.retain(|w| !w.starts_with("root="));
    words.push(format!("root=PARTUUID={part2_uuid}"));

    let mut out = shell_words::join(words);
    out.push(' ');
    out.push_str(FIXED_TAIL);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_required_flags_once() {
        let args = build_linux_args("rw quiet", "ABCD-1234", "/vorteil/vinitd").unwrap();
        assert_eq!(args.matches("rw").count(), 1);
        assert!(args.contains("loglevel=2"));
        assert!(args.contains("console=ttyS0,115200"));
        assert!(args.contains("console=tty0"));
        assert!(args.contains("root=PARTUUID=ABCD-1234"));
        assert!(args.contains("init=/vorteil/vinitd"));
        assert!(args.ends_with("vt.color=0x00"));
    }

    #[test]
    fn preserves_user_supplied_flags() {
        let args = build_linux_args("foo=bar", "UUID", "/vorteil/vinitd").unwrap();
        assert!(args.contains("foo=bar"));
    }

    #[test]
    fn quotes_values_with_whitespace() {
        let args = build_linux_args("my.opt=\"a b\"", "UUID", "/vorteil/vinitd").unwrap();
        assert!(args.contains("my.opt=a\\ b") || args.contains("'my.opt=a b'"));
    }
}

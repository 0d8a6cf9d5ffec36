use std::ffi::OsString;

use crate::error::HandshakeError;

/// The fixed descriptor/argv contract the host MUST honor when spawning the
/// child:
///
/// `argv[0]` is the executable path (ignored); `argv[1]` is the count of
/// "extra" descriptors the host is handing down, which always includes the
/// bootstrap and program descriptors (`extra_file_count >= 2`); `argv[2]`
/// is the one-shot bootstrap descriptor; `argv[3]` is the one-shot program
/// bundle descriptor; `argv[4 .. 4 + extra_file_count - 2]` are any further
/// extra descriptors the host chose to inherit down; everything from
/// `argv[2 + extra_file_count]` onward belongs to the user's own program and
/// is passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub bootstrap_fd: i32,
    pub program_fd: i32,
    pub extra_fds: Vec<i32>,
    pub user_args: Vec<OsString>,
}

pub fn parse_argv(args: &[OsString]) -> Result<Handshake, HandshakeError> {
    let extra_file_count = parse_int(args, 1, "extra file descriptor count")?;
    let bootstrap_fd = parse_int(args, 2, "bootstrap file descriptor")?;
    let program_fd = parse_int(args, 3, "program file descriptor")?;

    let extra_count = (extra_file_count - 2).max(0) as usize;
    let mut extra_fds = Vec::with_capacity(extra_count);
    for i in 0..extra_count {
        extra_fds.push(parse_int(args, 4 + i, "extra file descriptor")?);
    }

    let user_args_start = (2 + extra_file_count).max(0) as usize;
    let user_args = args.get(user_args_start..).map(<[OsString]>::to_vec).unwrap_or_default();

    Ok(Handshake {
        bootstrap_fd,
        program_fd,
        extra_fds,
        user_args,
    })
}

fn parse_int(args: &[OsString], index: usize, what: &'static str) -> Result<i32, HandshakeError> {
    let raw = args
        .get(index)
        .ok_or(HandshakeError::Missing { index, what })?;
    let text = raw.to_string_lossy();
    text.parse::<i32>()
        .map_err(|source| HandshakeError::Invalid {
            index,
            value: text.into_owned(),
            what,
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(values: &[&str]) -> Vec<OsString> {
        values.iter().map(OsString::from).collect()
    }

    #[test]
    fn parses_minimal_handshake_with_no_extra_descriptors() {
        let args = argv(&["child", "2", "10", "11", "--flag", "value"]);
        let handshake = parse_argv(&args).unwrap();
        assert_eq!(handshake.bootstrap_fd, 10);
        assert_eq!(handshake.program_fd, 11);
        assert!(handshake.extra_fds.is_empty());
        assert_eq!(handshake.user_args, argv(&["--flag", "value"])[..]);
    }

    #[test]
    fn parses_additional_extra_descriptors() {
        let args = argv(&["child", "4", "10", "11", "12", "13", "positional"]);
        let handshake = parse_argv(&args).unwrap();
        assert_eq!(handshake.extra_fds, vec![12, 13]);
        assert_eq!(handshake.user_args, argv(&["positional"]));
    }

    #[test]
    fn missing_program_fd_is_reported() {
        let args = argv(&["child", "2", "10"]);
        let err = parse_argv(&args).unwrap_err();
        assert!(matches!(err, HandshakeError::Missing { index: 3, .. }));
    }

    #[test]
    fn non_numeric_fd_is_reported() {
        let args = argv(&["child", "2", "not-a-number", "11"]);
        let err = parse_argv(&args).unwrap_err();
        assert!(matches!(err, HandshakeError::Invalid { index: 2, .. }));
    }
}

//! Launch parameters.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// Extra switches applied to a launched debuggee
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchFlags
{
    /// Run the debuggee with address-space randomization disabled
    /// (`personality(ADDR_NO_RANDOMIZE)`), so addresses repeat between runs.
    pub disable_aslr: bool,
}

/// Everything needed to start a debuggee
///
/// The values are handed to the spawner as-is. `argv[0]` defaults to the
/// program path when no arguments are given.
///
/// Standard streams without an explicit path are connected to a fresh
/// pseudo-terminal whose master end becomes the monitor's terminal
/// descriptor.
///
/// ## Example
///
/// ```rust
/// use tether_core::types::LaunchInfo;
///
/// let info = LaunchInfo::new("/bin/echo")
///     .arg("hello")
///     .env("LANG", "C")
///     .stdout("/tmp/echo.out")
///     .working_dir("/tmp");
///
/// assert_eq!(info.argv().len(), 2);
/// assert!(info.uses_terminal()); // stdin and stderr still need one
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchInfo
{
    program: PathBuf,
    argv: Vec<OsString>,
    env: Option<Vec<(OsString, OsString)>>,
    stdin: Option<PathBuf>,
    stdout: Option<PathBuf>,
    stderr: Option<PathBuf>,
    working_dir: Option<PathBuf>,
    flags: LaunchFlags,
}

impl LaunchInfo
{
    /// Launch `program` with `argv = [program]` and the inherited environment
    pub fn new(program: impl Into<PathBuf>) -> Self
    {
        let program = program.into();
        Self {
            argv: vec![program.clone().into_os_string()],
            program,
            env: None,
            stdin: None,
            stdout: None,
            stderr: None,
            working_dir: None,
            flags: LaunchFlags::default(),
        }
    }

    /// Append one argument after `argv[0]`
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self
    {
        self.argv.push(arg.into());
        self
    }

    /// Append several arguments after `argv[0]`
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    /// Replace `argv[0]`
    #[must_use]
    pub fn arg0(mut self, arg0: impl Into<OsString>) -> Self
    {
        self.argv[0] = arg0.into();
        self
    }

    /// Add a variable to an explicit environment
    ///
    /// The first call switches from the inherited environment to an explicit
    /// one that holds only the variables added here.
    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self
    {
        self.env.get_or_insert_with(Vec::new).push((key.into(), value.into()));
        self
    }

    /// Redirect stdin from a file
    #[must_use]
    pub fn stdin(mut self, path: impl Into<PathBuf>) -> Self
    {
        self.stdin = Some(path.into());
        self
    }

    /// Redirect stdout to a file (created or truncated)
    #[must_use]
    pub fn stdout(mut self, path: impl Into<PathBuf>) -> Self
    {
        self.stdout = Some(path.into());
        self
    }

    /// Redirect stderr to a file (created or truncated)
    #[must_use]
    pub fn stderr(mut self, path: impl Into<PathBuf>) -> Self
    {
        self.stderr = Some(path.into());
        self
    }

    /// Start the debuggee in `dir`
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self
    {
        self.working_dir = Some(dir.into());
        self
    }

    /// Replace the launch flags
    #[must_use]
    pub fn flags(mut self, flags: LaunchFlags) -> Self
    {
        self.flags = flags;
        self
    }

    /// Program to execute
    pub fn program(&self) -> &Path
    {
        &self.program
    }

    /// Full argument vector including `argv[0]`
    pub fn argv(&self) -> &[OsString]
    {
        &self.argv
    }

    /// Explicit environment, or `None` to inherit ours
    pub fn environment(&self) -> Option<&[(OsString, OsString)]>
    {
        self.env.as_deref()
    }

    /// Stdin redirection path
    pub fn stdin_path(&self) -> Option<&Path>
    {
        self.stdin.as_deref()
    }

    /// Stdout redirection path
    pub fn stdout_path(&self) -> Option<&Path>
    {
        self.stdout.as_deref()
    }

    /// Stderr redirection path
    pub fn stderr_path(&self) -> Option<&Path>
    {
        self.stderr.as_deref()
    }

    /// Working directory
    pub fn working_directory(&self) -> Option<&Path>
    {
        self.working_dir.as_deref()
    }

    /// Launch flags
    pub fn launch_flags(&self) -> LaunchFlags
    {
        self.flags
    }

    /// Whether at least one standard stream needs the pseudo-terminal
    pub fn uses_terminal(&self) -> bool
    {
        self.stdin.is_none() || self.stdout.is_none() || self.stderr.is_none()
    }

    /// Program name for log messages
    pub fn display_name(&self) -> &OsStr
    {
        self.program.file_name().unwrap_or(self.program.as_os_str())
    }
}

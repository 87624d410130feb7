use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use wait_timeout::ChildExt;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One external command. `env` is added on top of the inherited environment.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub program: &'a str,
    pub args: &'a [&'a str],
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
    run_as: Option<(u32, u32)>,
}

impl<'a> Invocation<'a> {
    pub fn new(program: &'a str, args: &'a [&'a str], timeout: Duration) -> Self {
        Self {
            program,
            args,
            env: Vec::new(),
            timeout,
            run_as: None,
        }
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// Drops to the `sudo` caller so their credentials and profiles apply.
    pub fn as_invoking_user(mut self) -> Self {
        if let Some(user) = invoking_user() {
            self.env
                .push(("HOME".to_string(), user.home_dir.display().to_string()));
            if let Some(name) = user.username {
                self.env.push(("USER".to_string(), name.clone()));
                self.env.push(("LOGNAME".to_string(), name));
            }
            self.run_as = Some((user.uid, user.gid));
        }
        self
    }

    /// Runs to completion with piped output. The child is killed once the
    /// timeout elapses; output is drained concurrently so a chatty child
    /// cannot block on a full pipe.
    pub fn run(&self) -> Result<CommandOutput> {
        let cmd = self.program;
        let mut command = Command::new(cmd);
        command
            .args(self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (k, v) in &self.env {
            command.env(k, v);
        }

        #[cfg(unix)]
        if let Some((uid, gid)) = self.run_as {
            use std::os::unix::process::CommandExt;
            command.uid(uid);
            command.gid(gid);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("プロセス起動に失敗しました: {cmd}"))?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match child
            .wait_timeout(self.timeout)
            .with_context(|| format!("プロセス待機に失敗しました: {cmd}"))?
        {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(anyhow!("タイムアウトしました（{:?}）: {cmd}", self.timeout));
            }
        };

        Ok(CommandOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
        })
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    })
}

#[derive(Debug, Clone)]
pub struct InvokingUser {
    pub uid: u32,
    pub gid: u32,
    pub username: Option<String>,
    pub home_dir: PathBuf,
}

/// The user behind `sudo`, if any. Credentials and config are read from their home.
pub fn invoking_user() -> Option<InvokingUser> {
    let uid = std::env::var("SUDO_UID").ok()?.parse::<u32>().ok()?;
    let gid = std::env::var("SUDO_GID").ok()?.parse::<u32>().ok()?;
    let username = std::env::var("SUDO_USER").ok();
    let home_dir = home_dir_for_uid(uid)?;

    Some(InvokingUser {
        uid,
        gid,
        username,
        home_dir,
    })
}

pub fn effective_home_dir() -> Result<PathBuf> {
    if let Some(user) = invoking_user() {
        return Ok(user.home_dir);
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("環境変数 HOME が設定されていません"))
}

#[cfg(unix)]
fn home_dir_for_uid(uid: u32) -> Option<PathBuf> {
    use std::ffi::CStr;

    unsafe {
        let bufsize = libc::sysconf(libc::_SC_GETPW_R_SIZE_MAX);
        let bufsize = if bufsize <= 0 {
            16 * 1024
        } else {
            bufsize as usize
        };
        let mut buf = vec![0u8; bufsize];
        let mut pwd: libc::passwd = std::mem::zeroed();
        let mut result: *mut libc::passwd = std::ptr::null_mut();

        let rc = libc::getpwuid_r(
            uid as libc::uid_t,
            &mut pwd,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        );
        if rc != 0 || result.is_null() || pwd.pw_dir.is_null() {
            return None;
        }

        let dir = CStr::from_ptr(pwd.pw_dir).to_string_lossy().to_string();
        if dir.trim().is_empty() {
            return None;
        }
        Some(PathBuf::from(dir))
    }
}

#[cfg(not(unix))]
fn home_dir_for_uid(_uid: u32) -> Option<PathBuf> {
    None
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_exit_code() {
        let out = Invocation::new("sh", &["-c", "echo hello; exit 3"], Duration::from_secs(5))
            .run()
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "hello");
        assert!(!out.success());
    }

    #[test]
    fn kills_child_after_timeout() {
        let err = Invocation::new("sh", &["-c", "sleep 5"], Duration::from_millis(100))
            .run()
            .unwrap_err();
        assert!(err.to_string().contains("タイムアウト"), "err={err:#}");
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let err = Invocation::new(
            "bucketguard-definitely-missing-binary",
            &[],
            Duration::from_secs(1),
        )
        .run()
        .unwrap_err();
        assert!(err.to_string().contains("プロセス起動に失敗しました"));
    }

    #[test]
    fn large_output_does_not_stall_the_child() {
        let out = Invocation::new(
            "sh",
            &["-c", "head -c 200000 /dev/zero | tr '\\0' x"],
            Duration::from_secs(5),
        )
        .run()
        .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.len(), 200_000);
    }

    #[test]
    fn extra_env_reaches_the_child() {
        let out = Invocation::new(
            "sh",
            &["-c", "printf '%s/%s' \"$BUCKETGUARD_PROBE\" \"${AWS_PAGER-unset}\""],
            Duration::from_secs(5),
        )
        .env("BUCKETGUARD_PROBE", "1")
        .env("AWS_PAGER", "")
        .run()
        .unwrap();
        assert_eq!(out.stdout, "1/");
    }
}

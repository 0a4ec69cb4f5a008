//! General purpose command-line utilities

use vmcheck_core::{Error, Result};

use crate::node::{shell_quote, ExecOptions, Node};

command_tool!(
    /// `cat`
    Cat,
    id = "cat",
    command = "cat"
);

impl Cat {
    /// Read a file, reusing an earlier read of the same file unless
    /// `force_run` is set
    pub fn read(&self, node: &Node, path: &str, sudo: bool, force_run: bool) -> Result<String> {
        let mut opts = ExecOptions::new()
            .no_info_log()
            .expect_exit_code(0, format!("failed to read {}", path));
        if sudo {
            opts = opts.sudo();
        }
        if force_run {
            opts = opts.force_run();
        }
        let result = node.execute_cached(&format!("cat {}", shell_quote(path)?), &opts)?;
        Ok(result.stdout)
    }

    /// Run `cat` with raw arguments
    pub fn run(&self, node: &Node, args: &str, opts: &ExecOptions) -> Result<String> {
        Ok(node.execute(&format!("cat {}", args), opts)?.stdout)
    }
}

command_tool!(
    /// `sed`, editing files in place with a `.bak` backup
    Sed,
    id = "sed",
    command = "sed"
);

impl Sed {
    /// Replace `regexp` with `replacement` on every line, or only on lines
    /// matching `match_lines`. Patterns use `/` as the delimiter.
    pub fn substitute(
        &self,
        node: &Node,
        regexp: &str,
        replacement: &str,
        file: &str,
        match_lines: Option<&str>,
        sudo: bool,
    ) -> Result<()> {
        let expression = match match_lines {
            Some(lines) => format!("/{}/s/{}/{}/g", lines, regexp, replacement),
            None => format!("s/{}/{}/g", regexp, replacement),
        };
        self.edit(node, &expression, file, sudo)
    }

    /// Append a line at the end of a file
    pub fn append(&self, node: &Node, text: &str, file: &str, sudo: bool) -> Result<()> {
        self.edit(node, &format!("$a {}", text), file, sudo)
    }

    fn edit(&self, node: &Node, expression: &str, file: &str, sudo: bool) -> Result<()> {
        let command = format!("sed -i.bak {} {}", shell_quote(expression)?, shell_quote(file)?);
        let mut opts = ExecOptions::new().expect_exit_code(0, format!("failed to edit {}", file));
        if sudo {
            opts = opts.sudo();
        }
        node.execute(&command, &opts)?;
        Ok(())
    }
}

command_tool!(
    /// Shell `echo`
    Echo,
    id = "echo",
    command = "echo"
);

impl Echo {
    /// Write `value` into `file`, replacing or appending
    pub fn write_to_file(
        &self,
        node: &Node,
        value: &str,
        file: &str,
        append: bool,
        sudo: bool,
    ) -> Result<()> {
        let redirect = if append { ">>" } else { ">" };
        let command = format!("echo {} {} {}", shell_quote(value)?, redirect, shell_quote(file)?);
        let mut opts = ExecOptions::new()
            .shell()
            .expect_exit_code(0, format!("failed to write {}", file));
        if sudo {
            opts = opts.sudo();
        }
        node.execute(&command, &opts)?;
        Ok(())
    }
}

command_tool!(
    /// systemd services through `systemctl`
    Service,
    id = "service",
    command = "systemctl"
);

// `systemctl status` exit code for a unit that does not exist
const UNIT_NOT_FOUND: i32 = 4;

impl Service {
    pub fn enable(&self, node: &Node, name: &str) -> Result<()> {
        self.systemctl(node, "enable", name)
    }

    pub fn restart(&self, node: &Node, name: &str) -> Result<()> {
        self.systemctl(node, "restart", name)
    }

    pub fn stop(&self, node: &Node, name: &str) -> Result<()> {
        self.systemctl(node, "stop", name)
    }

    pub fn is_enabled(&self, node: &Node, name: &str) -> Result<bool> {
        let result = node.execute(
            &format!("systemctl is-enabled {}", shell_quote(name)?),
            &ExecOptions::new().sudo().quiet(),
        )?;
        Ok(result.is_success())
    }

    pub fn is_running(&self, node: &Node, name: &str) -> Result<bool> {
        let result = node.execute(
            &format!("systemctl is-active {}", shell_quote(name)?),
            &ExecOptions::new().sudo().quiet(),
        )?;
        Ok(result.is_success())
    }

    pub fn exists(&self, node: &Node, name: &str) -> Result<bool> {
        let result = node.execute(
            &format!("systemctl --full --no-pager status {}", shell_quote(name)?),
            &ExecOptions::new().sudo().quiet(),
        )?;
        Ok(result.exit_code != UNIT_NOT_FOUND && !result.stderr.contains("could not be found"))
    }

    fn systemctl(&self, node: &Node, action: &str, name: &str) -> Result<()> {
        node.execute(
            &format!("systemctl {} {}", action, shell_quote(name)?),
            &ExecOptions::new()
                .sudo()
                .expect_exit_code(0, format!("failed to {} service {}", action, name)),
        )?;
        Ok(())
    }
}

command_tool!(
    /// Kernel parameters through `sysctl`
    Sysctl,
    id = "sysctl",
    command = "sysctl"
);

impl Sysctl {
    pub fn write(&self, node: &Node, variable: &str, value: &str) -> Result<()> {
        let assignment = format!("{}={}", variable, value);
        node.execute(
            &format!("sysctl -w {}", shell_quote(&assignment)?),
            &ExecOptions::new()
                .sudo()
                .expect_exit_code(0, format!("failed to set {}", assignment)),
        )?;
        Ok(())
    }

    pub fn get(&self, node: &Node, variable: &str) -> Result<String> {
        let result = node.execute(
            &format!("sysctl -n {}", shell_quote(variable)?),
            &ExecOptions::new()
                .no_info_log()
                .expect_exit_code(0, format!("failed to read {}", variable)),
        )?;
        Ok(result.stdout)
    }
}

command_tool!(
    /// `wget` downloads
    Wget,
    id = "wget",
    command = "wget",
    package = "wget"
);

impl Wget {
    /// Download `url` into `dir` and return the path of the file
    ///
    /// The file name defaults to the last segment of the URL. An existing
    /// file is kept unless `overwrite` is set.
    pub fn get(
        &self,
        node: &Node,
        url: &str,
        dir: &str,
        file_name: Option<&str>,
        overwrite: bool,
        sudo: bool,
    ) -> Result<String> {
        let file_name = match file_name {
            Some(name) => name,
            None => url_file_name(url)?,
        };
        let path = format!("{}/{}", dir.trim_end_matches('/'), file_name);

        if !overwrite && node.path_exists(&path)? {
            tracing::debug!(node = %node.name(), path = %path, "download already present");
            return Ok(path);
        }

        let command = format!(
            "mkdir -p {} && wget {} -O {}",
            shell_quote(dir)?,
            shell_quote(url)?,
            shell_quote(&path)?
        );
        let mut opts = ExecOptions::new()
            .shell()
            .expect_exit_code(0, format!("failed to download {}", url));
        if sudo {
            opts = opts.sudo();
        }
        node.execute(&command, &opts)?;
        Ok(path)
    }
}

fn url_file_name(url: &str) -> Result<&str> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && !name.contains(':'))
        .ok_or_else(|| Error::invalid_argument(format!("cannot derive a file name from {}", url)))
}

command_tool!(
    /// `tar` archives
    Tar,
    id = "tar",
    command = "tar",
    package = "tar"
);

impl Tar {
    /// Extract `file` into `dest_dir`, creating the directory
    pub fn extract(
        &self,
        node: &Node,
        file: &str,
        dest_dir: &str,
        gzip: bool,
        sudo: bool,
    ) -> Result<()> {
        let flags = if gzip { "-xzf" } else { "-xf" };
        let command = format!(
            "mkdir -p {dest} && tar {flags} {file} -C {dest}",
            dest = shell_quote(dest_dir)?,
            flags = flags,
            file = shell_quote(file)?
        );
        let mut opts = ExecOptions::new()
            .shell()
            .expect_exit_code(0, format!("failed to extract {}", file));
        if sudo {
            opts = opts.sudo();
        }
        node.execute(&command, &opts)?;
        Ok(())
    }

    /// Top level folder of an archive
    pub fn root_folder(&self, node: &Node, file: &str) -> Result<String> {
        let result = node.execute(
            &format!("tar tf {} | sed -e 's@/.*@@' | uniq", shell_quote(file)?),
            &ExecOptions::new()
                .shell()
                .no_info_log()
                .expect_exit_code(0, format!("failed to list {}", file)),
        )?;
        let root = result
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string);
        root.ok_or_else(|| Error::condition_not_met(format!("archive {} is empty", file)))
    }
}

command_tool!(
    /// The C compiler, needed for source builds
    Gcc,
    id = "gcc",
    command = "gcc",
    package = "gcc"
);

command_tool!(
    /// `make`
    Make,
    id = "make",
    command = "make",
    package = "make"
);

impl Make {
    /// Run `make install` in `cwd`
    pub fn make_install(&self, node: &Node, cwd: &str, sudo: bool) -> Result<()> {
        let mut opts = ExecOptions::new()
            .shell()
            .cwd(cwd)
            .timeout(std::time::Duration::from_secs(1800))
            .expect_exit_code(0, format!("failed to make install in {}", cwd));
        if sudo {
            opts = opts.sudo();
        }
        node.execute("make install", &opts)?;
        Ok(())
    }
}

command_tool!(
    /// `git`
    Git,
    id = "git",
    command = "git",
    package = "git"
);

impl Git {
    /// Clone `url` under `cwd` and return the checkout path
    pub fn clone(
        &self,
        node: &Node,
        url: &str,
        cwd: &str,
        dir_name: Option<&str>,
    ) -> Result<String> {
        let dir_name = match dir_name {
            Some(name) => name,
            None => url_file_name(url)?.trim_end_matches(".git"),
        };
        let command = format!("git clone {} {}", shell_quote(url)?, shell_quote(dir_name)?);
        node.execute(
            &command,
            &ExecOptions::new()
                .cwd(cwd)
                .expect_exit_code(0, format!("failed to clone {}", url)),
        )?;
        Ok(format!("{}/{}", cwd.trim_end_matches('/'), dir_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_file_name() {
        let url = "https://mirrors.edge.kernel.org/pub/linux/utils/kernel/kexec/kexec-tools-2.0.18.tar.gz";
        assert_eq!(url_file_name(url).unwrap(), "kexec-tools-2.0.18.tar.gz");
        assert_eq!(url_file_name("https://github.com/org/repo.git/").unwrap(), "repo.git");
        assert!(url_file_name("https://").is_err());
    }
}

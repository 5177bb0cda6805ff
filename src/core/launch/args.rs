// ─── Server Command ───
// Builds the argument vector and process command for a server launch.

use std::path::Path;
use std::process::Stdio;

use super::config::LaunchConfig;

/// JVM system property that pre-accepts the server EULA.
pub const LICENSE_ACCEPT_FLAG: &str = "-Dcom.mojang.eula.agree=true";
pub const PORT_FLAG: &str = "--port";
pub const HEADLESS_FLAG: &str = "--nogui";

/// Arguments passed after the executable, in launch order:
/// heap flags, license flag, passthrough args, `-jar <jar>`, port, headless.
pub fn build_server_args(config: &LaunchConfig, server_jar: &Path) -> Vec<String> {
    let mut args = vec![
        format!("-Xms{}M", config.memory_mb()),
        format!("-Xmx{}M", config.memory_mb()),
    ];

    if config.auto_accept_license() {
        args.push(LICENSE_ACCEPT_FLAG.to_string());
    }

    args.extend(config.extra_args().iter().cloned());

    args.push("-jar".into());
    args.push(server_jar.to_string_lossy().to_string());
    args.push(PORT_FLAG.into());
    args.push(config.port().to_string());
    args.push(HEADLESS_FLAG.into());

    args
}

/// Process command with all three standard streams piped and the working
/// directory set to `working_dir`. The child is killed if its handle drops.
pub fn server_command(
    config: &LaunchConfig,
    server_jar: &Path,
    working_dir: &Path,
) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(config.executable_path());
    cmd.args(build_server_args(config, server_jar))
        .current_dir(working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

pub fn format_command_for_logs(cmd: &std::process::Command) -> String {
    let program = shell_escape(&cmd.get_program().to_string_lossy());
    let args = cmd
        .get_args()
        .map(|arg| shell_escape(&arg.to_string_lossy()))
        .collect::<Vec<_>>()
        .join(" ");

    if args.is_empty() {
        program
    } else {
        format!("{} {}", program, args)
    }
}

fn shell_escape(raw: &str) -> String {
    if raw.is_empty() {
        return "\"\"".to_string();
    }

    if raw.chars().all(|ch| {
        ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | ':' | '\\' | '=' | '+')
    }) {
        return raw.to_string();
    }

    format!("\"{}\"", raw.replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_vector_follows_launch_order() {
        let config = LaunchConfig::new(
            "/opt/java/bin/java",
            4096,
            25570,
            true,
            vec!["-XX:+UseG1GC".into()],
        )
        .unwrap();

        let args = build_server_args(&config, Path::new("/srv/runtime/server.jar"));

        assert_eq!(
            args,
            vec![
                "-Xms4096M",
                "-Xmx4096M",
                "-Dcom.mojang.eula.agree=true",
                "-XX:+UseG1GC",
                "-jar",
                "/srv/runtime/server.jar",
                "--port",
                "25570",
                "--nogui",
            ]
        );
    }

    #[test]
    fn license_flag_is_omitted_unless_requested() {
        let config = LaunchConfig::new("java", 1024, 25565, false, Vec::new()).unwrap();
        let args = build_server_args(&config, Path::new("server.jar"));

        assert!(!args.iter().any(|a| a == LICENSE_ACCEPT_FLAG));
        assert_eq!(args.first().map(String::as_str), Some("-Xms1024M"));
        assert_eq!(args.last().map(String::as_str), Some(HEADLESS_FLAG));
    }

    #[test]
    fn command_log_format_quotes_spaces() {
        let mut cmd = std::process::Command::new("/opt/my java/bin/java");
        cmd.arg("-Xmx1024M").arg("say hello");

        assert_eq!(
            format_command_for_logs(&cmd),
            "\"/opt/my java/bin/java\" -Xmx1024M \"say hello\""
        );
    }
}

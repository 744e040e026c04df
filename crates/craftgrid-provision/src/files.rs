//! Files written into a server directory.

use std::io;
use std::path::Path;

use craft_core::ServerConfig;

pub const SERVER_JAR: &str = "server.jar";
pub const PROPERTIES_FILE: &str = "server.properties";
pub const EULA_FILE: &str = "eula.txt";

#[cfg(windows)]
pub const START_SCRIPT: &str = "start.bat";
#[cfg(not(windows))]
pub const START_SCRIPT: &str = "start.sh";

/// Launch script body for the given java runtime and heap size.
#[cfg(not(windows))]
pub fn start_script(java: &str, memory_mb: u32) -> String {
    // exec so the supervisor's signals reach the JVM directly.
    format!("#!/bin/bash\nexec {java} -Xmx{memory_mb}M -Xms{memory_mb}M -jar {SERVER_JAR} nogui\n")
}

#[cfg(windows)]
pub fn start_script(java: &str, memory_mb: u32) -> String {
    format!("@echo off\r\n{java} -Xmx{memory_mb}M -Xms{memory_mb}M -jar {SERVER_JAR} nogui\r\n")
}

pub async fn write_properties(dir: &Path, config: &ServerConfig) -> io::Result<()> {
    tokio::fs::write(dir.join(PROPERTIES_FILE), config.to_properties()).await
}

pub async fn write_eula(dir: &Path) -> io::Result<()> {
    tokio::fs::write(dir.join(EULA_FILE), "eula=true\n").await
}

pub async fn write_start_script(dir: &Path, java: &str, memory_mb: u32) -> io::Result<()> {
    let path = dir.join(START_SCRIPT);
    tokio::fs::write(&path, start_script(java, memory_mb)).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_script_embeds_memory() {
        let script = start_script("/opt/jdk/bin/java", 4096);
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("exec /opt/jdk/bin/java -Xmx4096M -Xms4096M -jar server.jar nogui"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_script_is_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        write_start_script(dir.path(), "java", 2048).await.unwrap();
        let mode = std::fs::metadata(dir.path().join(START_SCRIPT))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[tokio::test]
    async fn test_eula_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(EULA_FILE), "eula=false\n").unwrap();
        write_eula(dir.path()).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join(EULA_FILE)).unwrap(),
            "eula=true\n"
        );
    }
}

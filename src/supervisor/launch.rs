//! Launch preparation: java command line, server.properties, EULA gate.

use crate::config::ServerConfig;
use anyhow::Result;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Java 런타임 바이너리 (PATH 에서 해석)
pub const JAVA_BIN: &str = "java";

/// 콘솔로 보내는 graceful 종료 명령
pub const GRACEFUL_STOP_COMMAND: &str = "stop";

/// server.properties로 내보내는 설정 키 → 프로퍼티 키 매핑
pub const RECOGNIZED_PROPERTIES: &[(&str, &str)] = &[
    ("motd", "motd"),
    ("port", "server-port"),
    ("max_players", "max-players"),
    ("view_distance", "view-distance"),
    ("online_mode", "online-mode"),
    ("level_seed", "level-seed"),
    ("difficulty", "difficulty"),
    ("gamemode", "gamemode"),
    ("pvp", "pvp"),
    ("spawn_protection", "spawn-protection"),
];

const PROPERTIES_FILE: &str = "server.properties";
const EULA_FILE: &str = "eula.txt";

/// Build the full argument vector for launching the server:
/// `java -Xms<mem> -Xmx<mem> [jvm_args...] -jar <core> [server_args...]`
///
/// `jvm_args`/`server_args`는 공백 기준 분리만 지원합니다 (따옴표 해석 없음).
/// 최소/최대 힙은 동일 값으로 고정합니다. `java_bin` 키로 런타임 경로를
/// 덮어쓸 수 있고, 비어 있으면 PATH의 `java`를 사용합니다.
pub fn build_command_line(config: &ServerConfig) -> Vec<String> {
    let memory = config.get("memory");
    let core = config.get("core");
    let jvm_args = config.get("jvm_args");
    let server_args = config.get("server_args");

    let java = match config.get("java_bin") {
        "" => JAVA_BIN,
        path => path,
    };

    let mut cmd = vec![
        java.to_string(),
        format!("-Xms{}", memory),
        format!("-Xmx{}", memory),
    ];

    cmd.extend(jvm_args.split_whitespace().map(String::from));
    cmd.push("-jar".to_string());
    cmd.push(core.to_string());
    cmd.extend(server_args.split_whitespace().map(String::from));

    cmd
}

/// 기존 server.properties 파일 파싱.
///
/// `key=value` 라인만 수집하고 주석(`#`)과 빈 줄은 건너뜁니다.
pub fn read_properties(working_dir: &Path) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    let path = working_dir.join(PROPERTIES_FILE);

    if let Ok(content) = fs::read_to_string(&path) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                properties.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }

    properties
}

/// Write server.properties derived from the config, immediately before start.
///
/// 정책: 기존 파일을 먼저 읽어 인식하지 못하는 키는 보존하고,
/// 인식되는 키만 설정값으로 덮어씁니다. 모든 쓰기 경로에서 동일하게 적용.
pub fn write_properties(working_dir: &Path, config: &ServerConfig) -> Result<()> {
    let mut properties = read_properties(working_dir);

    for (config_key, property_key) in RECOGNIZED_PROPERTIES {
        properties.insert(property_key.to_string(), config.get(config_key).to_string());
    }

    let mut out = String::from("# Minecraft server properties\n");
    for (key, value) in &properties {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }

    fs::write(working_dir.join(PROPERTIES_FILE), out)?;
    Ok(())
}

/// eula.txt가 존재하고 `eula=true`를 포함하는지 확인.
pub fn eula_accepted(working_dir: &Path) -> bool {
    let path = working_dir.join(EULA_FILE);
    match fs::read_to_string(path) {
        Ok(content) => content.to_lowercase().contains("eula=true"),
        Err(_) => false,
    }
}

/// Record explicit EULA consent by (re)writing eula.txt.
///
/// 호출 전에 사용자 동의를 받는 것은 API 호출자의 책임입니다.
pub fn accept_eula(working_dir: &Path) -> Result<()> {
    fs::create_dir_all(working_dir)?;
    let content = "#By changing the setting below to TRUE you are indicating your agreement to our EULA (https://account.mojang.com/documents/minecraft_eula).\neula=true\n";
    fs::write(working_dir.join(EULA_FILE), content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_in(dir: &Path) -> ServerConfig {
        ServerConfig::open(dir.join("server_config.json"))
    }

    #[test]
    fn test_command_line_exact_vector() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.set("memory", "4G");
        config.set("jvm_args", "-XX:+UseG1GC");
        config.set("core", "server.jar");
        config.set("server_args", "nogui");

        let cmd = build_command_line(&config);
        assert_eq!(
            cmd,
            vec![
                "java",
                "-Xms4G",
                "-Xmx4G",
                "-XX:+UseG1GC",
                "-jar",
                "server.jar",
                "nogui"
            ]
        );
    }

    #[test]
    fn test_command_line_empty_args_omitted() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.set("memory", "512M");
        config.set("jvm_args", "");
        config.set("server_args", "");
        config.set("core", "paper.jar");

        let cmd = build_command_line(&config);
        assert_eq!(cmd, vec!["java", "-Xms512M", "-Xmx512M", "-jar", "paper.jar"]);
    }

    #[test]
    fn test_command_line_multiple_jvm_args_split() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.set("jvm_args", "-XX:+UseG1GC -XX:G1HeapRegionSize=32m");

        let cmd = build_command_line(&config);
        let jar_pos = cmd.iter().position(|a| a == "-jar").unwrap();
        assert_eq!(&cmd[3..jar_pos], &["-XX:+UseG1GC", "-XX:G1HeapRegionSize=32m"]);
    }

    #[test]
    fn test_command_line_java_bin_override() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.set("java_bin", "/opt/jdk17/bin/java");

        let cmd = build_command_line(&config);
        assert_eq!(cmd[0], "/opt/jdk17/bin/java");
    }

    #[test]
    fn test_write_properties_emits_recognized_keys() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.set("motd", "Hello World");
        config.set("port", "25570");

        write_properties(dir.path(), &config).unwrap();

        let props = read_properties(dir.path());
        assert_eq!(props.get("motd").unwrap(), "Hello World");
        assert_eq!(props.get("server-port").unwrap(), "25570");
        assert_eq!(props.get("gamemode").unwrap(), "survival");
        // 모든 인식 키가 방출되어야 함
        for (_, property_key) in RECOGNIZED_PROPERTIES {
            assert!(props.contains_key(*property_key), "missing {}", property_key);
        }
    }

    #[test]
    fn test_write_properties_preserves_unrecognized_keys() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("server.properties"),
            "# Minecraft server properties\nallow-flight=true\nserver-port=11111\n",
        )
        .unwrap();

        let config = config_in(dir.path());
        write_properties(dir.path(), &config).unwrap();

        let props = read_properties(dir.path());
        // 모르는 키는 보존
        assert_eq!(props.get("allow-flight").unwrap(), "true");
        // 인식하는 키는 설정값으로 덮어씀
        assert_eq!(props.get("server-port").unwrap(), "25565");
    }

    #[test]
    fn test_eula_gate() {
        let dir = tempdir().unwrap();
        assert!(!eula_accepted(dir.path()));

        std::fs::write(dir.path().join("eula.txt"), "eula=false\n").unwrap();
        assert!(!eula_accepted(dir.path()));

        accept_eula(dir.path()).unwrap();
        assert!(eula_accepted(dir.path()));
    }

    #[test]
    fn test_eula_case_insensitive() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("eula.txt"), "EULA=TRUE\n").unwrap();
        assert!(eula_accepted(dir.path()));
    }
}

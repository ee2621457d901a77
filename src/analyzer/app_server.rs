//! Java application server detection
//!
//! A five-step ladder, first conclusive step wins:
//! 1. dependency names matched against a server keyword table, exact before
//!    substring
//! 2. Spring Boot embedded-server inference from starter artifacts
//! 3. server-specific configuration file presence, in priority order
//! 4. build-file indicator scan (packaging, server plugins)
//! 5. `@SpringBootApplication` annotation search, bounded by depth and file
//!    size

use std::path::Path;

/// Dependency keyword table: exact artifact name, then substring.
const SERVER_DEPENDENCIES: &[(&str, &str)] = &[
    ("spring-boot-starter-tomcat", "spring-embedded-tomcat"),
    ("spring-boot-starter-jetty", "spring-embedded-jetty"),
    ("spring-boot-starter-undertow", "spring-embedded-undertow"),
    ("tomcat-embed-core", "embedded-tomcat"),
    ("jetty-server", "jetty"),
    ("undertow-core", "undertow"),
    ("wildfly-core", "wildfly"),
    ("jboss-as-server", "jboss"),
    ("websphere-liberty", "liberty"),
    ("openliberty-runtime", "liberty"),
    ("payara-embedded-all", "payara"),
    ("glassfish-embedded-all", "glassfish"),
];

/// Config files that identify a server, highest confidence first.
const SERVER_CONFIG_FILES: &[(&str, &str)] = &[
    ("src/main/liberty/config/server.xml", "liberty"),
    ("src/main/webapp/WEB-INF/jetty-web.xml", "jetty"),
    ("src/main/webapp/WEB-INF/jboss-web.xml", "jboss"),
    ("src/main/webapp/WEB-INF/glassfish-web.xml", "glassfish"),
    ("standalone.xml", "wildfly"),
    ("src/main/webapp/WEB-INF/web.xml", "servlet-container"),
];

/// Build-file fragments that indicate a server.
const BUILD_INDICATORS: &[(&str, &str)] = &[
    ("tomcat-maven-plugin", "tomcat"),
    ("jetty-maven-plugin", "jetty"),
    ("wildfly-maven-plugin", "wildfly"),
    ("liberty-maven-plugin", "liberty"),
    ("<packaging>war</packaging>", "servlet-container"),
];

/// Detect the application server for a Java repository.
pub fn detect_app_server(root: &Path, dependencies: &[String]) -> Option<String> {
    if let Some(server) = match_dependencies(dependencies) {
        return Some(server);
    }
    if let Some(server) = infer_spring_embedded(dependencies) {
        return Some(server);
    }
    if let Some(server) = match_config_files(root) {
        return Some(server);
    }
    if let Some(server) = scan_build_files(root) {
        return Some(server);
    }
    if has_spring_boot_annotation(root) {
        return Some("spring-embedded-tomcat".to_string());
    }
    None
}

fn match_dependencies(dependencies: &[String]) -> Option<String> {
    for (keyword, server) in SERVER_DEPENDENCIES {
        if dependencies.iter().any(|d| d == keyword) {
            return Some(server.to_string());
        }
    }
    for (keyword, server) in SERVER_DEPENDENCIES {
        if dependencies.iter().any(|d| d.contains(keyword)) {
            return Some(server.to_string());
        }
    }
    None
}

/// Spring Boot web starters embed Tomcat unless another starter overrides it.
fn infer_spring_embedded(dependencies: &[String]) -> Option<String> {
    let has_web_starter = dependencies
        .iter()
        .any(|d| d == "spring-boot-starter-web" || d == "spring-boot-starter-webflux");
    if !has_web_starter {
        return None;
    }
    if dependencies.iter().any(|d| d.contains("jetty")) {
        return Some("spring-embedded-jetty".to_string());
    }
    if dependencies.iter().any(|d| d.contains("undertow")) {
        return Some("spring-embedded-undertow".to_string());
    }
    Some("spring-embedded-tomcat".to_string())
}

fn match_config_files(root: &Path) -> Option<String> {
    for (file, server) in SERVER_CONFIG_FILES {
        if root.join(file).exists() {
            return Some(server.to_string());
        }
    }
    None
}

fn scan_build_files(root: &Path) -> Option<String> {
    for build_file in ["pom.xml", "build.gradle", "build.gradle.kts"] {
        if let Some(content) = super::read_capped(&root.join(build_file)) {
            for (indicator, server) in BUILD_INDICATORS {
                if content.contains(indicator) {
                    return Some(server.to_string());
                }
            }
        }
    }
    None
}

/// Bounded search for `@SpringBootApplication` under the source tree.
fn has_spring_boot_annotation(root: &Path) -> bool {
    super::collect_files(root, super::MAX_SCAN_DEPTH)
        .into_iter()
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("java"))
        .filter_map(|p| super::read_capped(&p))
        .any(|content| content.contains("@SpringBootApplication"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn deps(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn explicit_starter_outranks_inference() {
        let result = detect_app_server(
            Path::new("/nonexistent"),
            &deps(&["spring-boot-starter-web", "spring-boot-starter-jetty"]),
        );
        assert_eq!(result.as_deref(), Some("spring-embedded-jetty"));
    }

    #[test]
    fn web_starter_implies_tomcat() {
        let result = detect_app_server(Path::new("/nonexistent"), &deps(&["spring-boot-starter-web"]));
        assert_eq!(result.as_deref(), Some("spring-embedded-tomcat"));
    }

    #[test]
    fn undertow_inference() {
        let result = infer_spring_embedded(&deps(&[
            "spring-boot-starter-webflux",
            "spring-boot-starter-undertow",
        ]));
        assert_eq!(result.as_deref(), Some("spring-embedded-undertow"));
    }

    #[test]
    fn config_file_detection() {
        let dir = TempDir::new().unwrap();
        let liberty = dir.path().join("src/main/liberty/config");
        std::fs::create_dir_all(&liberty).unwrap();
        std::fs::write(liberty.join("server.xml"), "<server/>").unwrap();
        assert_eq!(
            detect_app_server(dir.path(), &[]).as_deref(),
            Some("liberty")
        );
    }

    #[test]
    fn war_packaging_indicator() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("pom.xml"),
            "<project><packaging>war</packaging></project>",
        )
        .unwrap();
        assert_eq!(
            detect_app_server(dir.path(), &[]).as_deref(),
            Some("servlet-container")
        );
    }

    #[test]
    fn annotation_fallback() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("src/main/java/com/example");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(
            pkg.join("App.java"),
            "@SpringBootApplication\npublic class App {}",
        )
        .unwrap();
        assert_eq!(
            detect_app_server(dir.path(), &[]).as_deref(),
            Some("spring-embedded-tomcat")
        );
    }

    #[test]
    fn nothing_detected() {
        let dir = TempDir::new().unwrap();
        assert!(detect_app_server(dir.path(), &deps(&["guava"])).is_none());
    }
}

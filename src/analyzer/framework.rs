//! Framework detection from dependency manifests
//!
//! Table-driven: each rule names the dependency patterns that identify a
//! framework. Patterns match exactly or by substring; first rule hit per
//! language wins, tables are ordered most-specific first.

/// Framework detection rule.
struct FrameworkRule {
    name: &'static str,
    patterns: &'static [&'static str],
}

const JS_RULES: &[FrameworkRule] = &[
    FrameworkRule { name: "nextjs", patterns: &["next"] },
    FrameworkRule { name: "nestjs", patterns: &["@nestjs/core"] },
    FrameworkRule { name: "express", patterns: &["express"] },
    FrameworkRule { name: "fastify", patterns: &["fastify"] },
    FrameworkRule { name: "koa", patterns: &["koa"] },
];

const PYTHON_RULES: &[FrameworkRule] = &[
    FrameworkRule { name: "django", patterns: &["django"] },
    FrameworkRule { name: "fastapi", patterns: &["fastapi"] },
    FrameworkRule { name: "flask", patterns: &["flask"] },
];

const JAVA_RULES: &[FrameworkRule] = &[
    FrameworkRule {
        name: "spring",
        patterns: &["spring-boot-starter", "spring-boot", "spring-web", "spring-core"],
    },
    FrameworkRule { name: "quarkus", patterns: &["quarkus"] },
    FrameworkRule { name: "micronaut", patterns: &["micronaut"] },
];

const GO_RULES: &[FrameworkRule] = &[
    FrameworkRule { name: "gin", patterns: &["github.com/gin-gonic/gin"] },
    FrameworkRule { name: "echo", patterns: &["github.com/labstack/echo"] },
    FrameworkRule { name: "fiber", patterns: &["github.com/gofiber/fiber"] },
    FrameworkRule { name: "chi", patterns: &["github.com/go-chi/chi"] },
];

const RUST_RULES: &[FrameworkRule] = &[
    FrameworkRule { name: "actix-web", patterns: &["actix-web"] },
    FrameworkRule { name: "axum", patterns: &["axum"] },
    FrameworkRule { name: "rocket", patterns: &["rocket"] },
];

const RUBY_RULES: &[FrameworkRule] = &[
    FrameworkRule { name: "rails", patterns: &["rails"] },
    FrameworkRule { name: "sinatra", patterns: &["sinatra"] },
];

const PHP_RULES: &[FrameworkRule] = &[
    FrameworkRule { name: "laravel", patterns: &["laravel/framework"] },
    FrameworkRule { name: "symfony", patterns: &["symfony/framework-bundle"] },
];

fn rules_for(language: &str) -> &'static [FrameworkRule] {
    match language {
        "javascript" => JS_RULES,
        "python" => PYTHON_RULES,
        "java" => JAVA_RULES,
        "go" => GO_RULES,
        "rust" => RUST_RULES,
        "ruby" => RUBY_RULES,
        "php" => PHP_RULES,
        _ => &[],
    }
}

/// Detect the dominant framework from dependency names.
///
/// Exact name match is preferred over substring containment so `express`
/// does not fire on `express-rate-limit` alone when `express` itself is
/// absent.
pub fn detect_framework(language: &str, dependencies: &[String]) -> Option<String> {
    let rules = rules_for(language);
    for rule in rules {
        for pattern in rule.patterns {
            if dependencies.iter().any(|d| d == pattern) {
                return Some(rule.name.to_string());
            }
        }
    }
    for rule in rules {
        for pattern in rule.patterns {
            if dependencies.iter().any(|d| d.contains(pattern)) {
                return Some(rule.name.to_string());
            }
        }
    }
    None
}

/// Conventional default port for frameworks with an embedded server.
pub fn default_port(framework: &str) -> Option<u16> {
    match framework {
        "spring" | "spring-embedded-tomcat" | "spring-embedded-jetty"
        | "spring-embedded-undertow" => Some(8080),
        "express" | "nestjs" | "koa" => Some(3000),
        "nextjs" => Some(3000),
        "fastify" => Some(3000),
        "django" | "fastapi" | "quarkus" | "micronaut" => Some(8000),
        "flask" => Some(5000),
        "gin" | "echo" | "fiber" | "chi" | "actix-web" | "axum" | "rocket" => Some(8080),
        "rails" => Some(3000),
        _ => None,
    }
}

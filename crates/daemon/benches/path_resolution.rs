//! Performance benchmarks for request validation.
//!
//! These benchmarks measure the checks every action runs before touching
//! the filesystem:
//! - Client path resolution and containment
//! - Name exclusion lookups
//! - Name sanitizing

use std::fs;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use filedeck::files::{sanitize_name, NamePolicy, PathResolver};
use tempfile::TempDir;

fn setup_root() -> TempDir {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("projects/2024/reports/q3")).unwrap();
    fs::write(temp.path().join("projects/2024/reports/q3/summary.pdf"), b"x").unwrap();
    temp
}

/// Benchmark path resolution for typical and hostile inputs.
fn bench_resolve(c: &mut Criterion) {
    let temp = setup_root();
    let resolver = PathResolver::new(temp.path()).unwrap();
    let mut group = c.benchmark_group("resolve");

    group.bench_function("root", |b| b.iter(|| resolver.resolve(black_box("/"))));

    group.bench_function("existing_file", |b| {
        b.iter(|| resolver.resolve(black_box("/projects/2024/reports/q3/summary.pdf")))
    });

    group.bench_function("missing_leaf", |b| {
        b.iter(|| resolver.resolve(black_box("/projects/2024/new/deeper/file.txt")))
    });

    group.bench_function("traversal", |b| {
        b.iter(|| resolver.resolve(black_box("/projects/../../../../etc/passwd")))
    });

    group.bench_function("absolute_override", |b| {
        b.iter(|| resolver.resolve(black_box("~/.ssh/id_ed25519")))
    });

    group.finish();
}

/// Benchmark exclusion checks with exact names and expressions.
fn bench_name_policy(c: &mut Criterion) {
    let dirs: Vec<String> = ["_thumbs", ".git", ".svn", "node_modules"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let files: Vec<String> = [".htaccess", ".DS_Store", "Thumbs.db"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let exact = NamePolicy::new(&dirs, "", &files, "").unwrap();
    let with_regex = NamePolicy::new(&dirs, r"^\.", &files, r"\.(bak|tmp|swp)$").unwrap();

    let mut group = c.benchmark_group("name_policy");

    group.bench_function("exact_allowed", |b| {
        b.iter(|| exact.is_allowed_name(black_box("report.pdf"), false))
    });

    group.bench_function("exact_excluded", |b| {
        b.iter(|| exact.is_allowed_name(black_box("node_modules"), true))
    });

    group.bench_function("regex_allowed", |b| {
        b.iter(|| with_regex.is_allowed_name(black_box("report.pdf"), false))
    });

    group.bench_function("regex_excluded", |b| {
        b.iter(|| with_regex.is_allowed_name(black_box("draft.swp"), false))
    });

    group.finish();
}

/// Benchmark name sanitizing with and without transliteration.
fn bench_sanitize(c: &mut Criterion) {
    let mut group = c.benchmark_group("sanitize_name");

    group.bench_function("ascii", |b| {
        b.iter(|| sanitize_name(black_box("Quarterly Report (final).pdf"), &['.', '-'], false))
    });

    group.bench_function("latin_only", |b| {
        b.iter(|| sanitize_name(black_box("Résumé – Ångström.pdf"), &['.', '-'], true))
    });

    group.finish();
}

criterion_group!(benches, bench_resolve, bench_name_policy, bench_sanitize);
criterion_main!(benches);

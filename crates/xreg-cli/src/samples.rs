//! Sample data generators for `xreg load`.

use anyhow::Context;
use rand::Rng;
use serde_json::json;
use tracing::info;

use xreg_model::{AttrHolder, AttrType, Item, WILDCARD};
use xreg_registry::{GroupKey, Registry, ResourceKey, WriteMode};
use xreg_types::{now_timestamp, Object, Value};

/// What a loader wrote.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub groups: usize,
    pub resources: usize,
    pub versions: usize,
    pub commits: usize,
}

fn obj(v: serde_json::Value) -> Object {
    Value::from(v).into_object().unwrap_or_default()
}

/// A `dirs` registry exercising extension attributes, meta extensions and
/// both document and non-document Resources, plus `extra` generated dirs.
/// Everything is written in one transaction.
pub fn load_dirs(reg: &mut Registry, extra: usize, rng: &mut impl Rng) -> anyhow::Result<LoadStats> {
    reg.set_now(now_timestamp());
    let model = reg.model_mut();
    model.add_attr("bool1", AttrType::Boolean)?;
    model.add_attr("int1", AttrType::Integer)?;
    model.add_attr("dec1", AttrType::Decimal)?;
    model.add_attr("str1", AttrType::String)?;
    model.add_attr_map("map1", Item::new(AttrType::String))?;
    model.add_attr_array("arr1", Item::new(AttrType::String))?;
    let dirs = model.add_group_model("dirs", "dir")?;
    let files = dirs.add_resource_model("files", "file", 2, true, true, true)?;
    files.add_meta_attr("rext", AttrType::String)?;
    files.add_meta_attr(WILDCARD, AttrType::Any)?;
    files.add_attr("vext", AttrType::String)?;
    let datas = dirs.add_resource_model("datas", "data", 2, true, true, false)?;
    datas.add_attr(WILDCARD, AttrType::String)?;
    reg.model().verify()?;
    reg.save_model()?;

    reg.update(
        obj(json!({
            "name": "Test Registry",
            "description": "A test reg",
            "documentation": "https://github.com/xregistry/spec",
            "labels": { "stage": "prod" },
            "bool1": true,
            "int1": 1,
            "dec1": 1.1,
            "str1": "hi",
            "map1": { "k1": "v1" },
            "arr1": ["arr1-value"]
        })),
        WriteMode::Merge,
    )?;

    let mut stats = LoadStats::default();
    let dir1 = GroupKey::new("dirs", "dir1");
    reg.upsert_group(&dir1, obj(json!({ "labels": { "private": "true" } })), WriteMode::Replace)?;
    stats.groups += 1;

    let f1 = ResourceKey::new(dir1.clone(), "files", "f1");
    reg.create_resource_version(&f1, obj(json!({ "versionid": "v1" })))?;
    reg.create_resource_version(&f1, obj(json!({ "versionid": "v2", "vext": "a ver string" })))?;
    reg.upsert_meta(
        &f1,
        obj(json!({ "labels": { "stage": "dev", "none": "" }, "rext": "a string" })),
        WriteMode::Merge,
    )?;
    let d1 = ResourceKey::new(dir1, "datas", "d1");
    reg.create_resource_version(&d1, obj(json!({ "versionid": "v1" })))?;
    stats.resources += 2;
    stats.versions += 3;

    for n in 0..extra {
        let dir = GroupKey::new("dirs", format!("dir{}", n + 2));
        reg.upsert_group(&dir, Object::new(), WriteMode::Replace)?;
        stats.groups += 1;
        for f in 0..rng.gen_range(1..=3) {
            let file = ResourceKey::new(dir.clone(), "files", format!("file{f}"));
            // maxversions keeps at most two of these.
            for v in 0..rng.gen_range(1..=3) {
                reg.create_resource_version(&file, obj(json!({ "versionid": format!("v{v}") })))?;
            }
            stats.resources += 1;
            stats.versions += reg.scan(&file.versions_path())?.len();
        }
    }

    reg.commit().context("committing dirs sample")?;
    stats.commits += 1;
    info!(groups = stats.groups, resources = stats.resources, "loaded dirs sample");
    Ok(stats)
}

const API_NAMES: &[&str] = &["billing", "catalog", "orders", "search", "users", "weather"];

/// `count` API providers, each with a few APIs carrying versioned OpenAPI
/// documents. Commits once per provider.
pub fn load_apis(reg: &mut Registry, count: usize, rng: &mut impl Rng) -> anyhow::Result<LoadStats> {
    reg.set_now(now_timestamp());
    let providers = reg.model_mut().add_group_model("apiproviders", "apiprovider")?;
    providers.add_resource_model("apis", "api", 0, true, true, true)?;
    reg.model().verify()?;
    reg.save_model()?;
    reg.commit()?;

    let mut stats = LoadStats::default();
    for p in 0..count {
        reg.set_now(now_timestamp());
        let provider = GroupKey::new("apiproviders", format!("provider{p}"));
        reg.upsert_group(
            &provider,
            obj(json!({ "name": format!("Provider {p}") })),
            WriteMode::Replace,
        )?;
        stats.groups += 1;

        let apis = rng.gen_range(1..=API_NAMES.len().min(4));
        for name in API_NAMES.iter().take(apis) {
            let api = ResourceKey::new(provider.clone(), "apis", *name);
            for major in 1..=rng.gen_range(1..=3u32) {
                let version = format!("{major}.0");
                reg.create_resource_version(
                    &api,
                    obj(json!({
                        "versionid": version,
                        "api": {
                            "openapi": "3.0.0",
                            "info": { "title": format!("{name} API"), "version": version },
                            "paths": {}
                        }
                    })),
                )?;
                stats.versions += 1;
            }
            stats.resources += 1;
        }
        reg.commit()
            .with_context(|| format!("committing {provider}"))?;
        stats.commits += 1;
    }
    info!(providers = stats.groups, apis = stats.resources, "loaded apis sample");
    Ok(stats)
}

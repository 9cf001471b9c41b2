//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/content.rs
//
// Manifest & Content Store. Content-addressed storage of
// serialized Bundle resource sets, gzip-compressed, keyed by a deterministic
// digest. Kept free of any `kube` dependency, a standalone client with a
// single narrow responsibility.
//
// SPDX-License-Identifier: Apache-2.0
//

use crate::crds::bundle::{BundleResource, ResourceEncoding};
use crate::errors::{FleetError, FleetResult};
use dashmap::DashMap;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

/// `{resources[], raw, digest}` — the in-memory, fully-decoded manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    pub resources: Vec<DecodedResource>,
    pub digest: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedResource {
    pub name: String,
    pub content: String,
}

impl Manifest {
    /// Canonical JSON serialization: resource order is preserved (it is
    /// semantically significant), map keys inside each
    /// resource are not reordered by us because `DecodedResource` is a
    /// struct with a fixed field order, which `serde_json` serializes in
    /// declaration order, giving a stable byte-for-byte encoding.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(&self.resources).expect("resource list always serializes")
    }

    pub fn compute_digest(&self) -> String {
        digest_of(&self.canonical_json())
    }
}

/// `s-` + hex(sha256(json(resources)))[:63].
pub fn digest_of(canonical_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json.as_bytes());
    let hex = hex::encode(hasher.finalize());
    format!("s-{}", &hex[..63.min(hex.len())])
}

/// Decode a Bundle's raw resource list into a `Manifest`, reversing
/// whatever encoding (plain/base64/gzip+base64) each resource declares.
pub fn decode_resources(resources: &[BundleResource]) -> FleetResult<Manifest> {
    let mut decoded = Vec::with_capacity(resources.len());
    for r in resources {
        let content = match r.encoding {
            ResourceEncoding::Plain => r.content.clone(),
            ResourceEncoding::Base64 => {
                let bytes = base64_decode(&r.content)?;
                String::from_utf8(bytes).map_err(|e| FleetError::Validation(format!("resource {} is not valid utf8: {e}", r.name)))?
            }
            ResourceEncoding::GzipBase64 => {
                let gz_bytes = base64_decode(&r.content)?;
                let mut decoder = GzDecoder::new(&gz_bytes[..]);
                let mut out = String::new();
                decoder
                    .read_to_string(&mut out)
                    .map_err(|e| FleetError::Validation(format!("resource {} failed to gunzip: {e}", r.name)))?;
                out
            }
        };
        decoded.push(DecodedResource { name: r.name.clone(), content });
    }

    let manifest_no_digest = Manifest { resources: decoded, digest: String::new() };
    let digest = manifest_no_digest.compute_digest();
    Ok(Manifest { digest, ..manifest_no_digest })
}

fn base64_decode(s: &str) -> FleetResult<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| FleetError::Validation(format!("invalid base64: {e}")))
}

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).expect("writing to an in-memory encoder cannot fail");
    encoder.finish().expect("finishing an in-memory encoder cannot fail")
}

/// Content-addressed storage of gzipped manifest JSON.
pub trait ContentStore: Send + Sync {
    /// Store the manifest if absent; idempotent; returns the digest.
    fn store(&self, manifest: &Manifest) -> FleetResult<String>;
    /// Read back a manifest by digest, verifying the stored bytes still
    /// hash to `id`.
    fn read(&self, id: &str) -> FleetResult<Manifest>;
}

/// In-process content store. Stands in for the `Content` CR, whose actual
/// etcd-backed storage is out of scope here; this type is exercised
/// through the `ContentStore` trait so a
/// Kubernetes-Secret-backed implementation can be swapped in without
/// touching callers.
#[derive(Default)]
pub struct GzipContentStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl GzipContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContentStore for GzipContentStore {
    fn store(&self, manifest: &Manifest) -> FleetResult<String> {
        let digest = manifest.compute_digest();
        if self.blobs.contains_key(&digest) {
            return Ok(digest);
        }
        let gz = gzip(manifest.canonical_json().as_bytes());
        self.blobs.insert(digest.clone(), gz);
        Ok(digest)
    }

    fn read(&self, id: &str) -> FleetResult<Manifest> {
        let gz = self
            .blobs
            .get(id)
            .ok_or_else(|| FleetError::NotFound(format!("content {id}")))?;
        let mut decoder = GzDecoder::new(&gz[..]);
        let mut json = String::new();
        decoder
            .read_to_string(&mut json)
            .map_err(|e| FleetError::ContentCorrupted { expected: id.to_string(), actual: format!("gunzip failed: {e}") })?;
        let resources: Vec<DecodedResource> = serde_json::from_str(&json)
            .map_err(|e| FleetError::ContentCorrupted { expected: id.to_string(), actual: format!("invalid json: {e}") })?;
        let manifest = Manifest { resources, digest: String::new() };
        let actual = manifest.compute_digest();
        if actual != id {
            return Err(FleetError::ContentCorrupted { expected: id.to_string(), actual });
        }
        Ok(Manifest { digest: actual, ..manifest })
    }
}

/// Minimal identity (apiVersion/kind/namespace/name) extracted from a
/// decoded resource's YAML, published onto Bundle status so callers can
/// cross-reference the first matching target's resources.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ResourceKey {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
}

#[derive(Deserialize)]
struct RawObjectMeta {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Deserialize)]
struct RawResource {
    #[serde(rename = "apiVersion")]
    api_version: String,
    kind: String,
    metadata: RawObjectMeta,
}

/// Parse every YAML document in the manifest into a `ResourceKey`; entries
/// that fail to parse (non-Kubernetes-shaped content, e.g. a values file
/// kept alongside a chart) are skipped rather than failing the whole
/// manifest.
pub fn resource_keys(manifest: &Manifest) -> Vec<ResourceKey> {
    let mut keys = Vec::new();
    for resource in &manifest.resources {
        for doc in serde_yaml::Deserializer::from_str(&resource.content) {
            if let Ok(raw) = RawResource::deserialize(doc) {
                keys.push(ResourceKey { api_version: raw.api_version, kind: raw.kind, namespace: raw.metadata.namespace, name: raw.metadata.name });
            }
        }
    }
    keys
}

/// Minimal hex encoding so we don't pull in an extra crate beyond `sha2`
/// purely for hex formatting.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            write!(s, "{:02x}", b).expect("writing to a String cannot fail");
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, content: &str) -> BundleResource {
        BundleResource { name: name.to_string(), content: content.to_string(), encoding: ResourceEncoding::Plain }
    }

    #[test]
    fn store_is_idempotent() {
        let store = GzipContentStore::new();
        let manifest = decode_resources(&[sample("svc.yaml", "kind: Service")]).unwrap();
        let id1 = store.store(&manifest).unwrap();
        let id2 = store.store(&manifest).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(store.blobs.len(), 1);
    }

    #[test]
    fn read_round_trips() {
        let store = GzipContentStore::new();
        let manifest = decode_resources(&[sample("svc.yaml", "kind: Service")]).unwrap();
        let id = store.store(&manifest).unwrap();
        let read_back = store.read(&id).unwrap();
        assert_eq!(read_back.resources, manifest.resources);
    }

    #[test]
    fn read_detects_corruption() {
        let store = GzipContentStore::new();
        let manifest = decode_resources(&[sample("svc.yaml", "kind: Service")]).unwrap();
        let id = store.store(&manifest).unwrap();
        store.blobs.insert(id.clone(), gzip(b"{}"));
        let err = store.read(&id).unwrap_err();
        assert!(matches!(err, FleetError::ContentCorrupted { .. }));
    }

    #[test]
    fn different_resources_produce_different_digests() {
        let a = decode_resources(&[sample("a.yaml", "kind: Service")]).unwrap();
        let b = decode_resources(&[sample("a.yaml", "kind: Deployment")]).unwrap();
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn digest_is_stable_across_runs() {
        let a = decode_resources(&[sample("a.yaml", "kind: Service")]).unwrap();
        let b = decode_resources(&[sample("a.yaml", "kind: Service")]).unwrap();
        assert_eq!(a.digest, b.digest);
    }

    #[test]
    fn gzip_base64_round_trips() {
        let raw = b"kind: Service\nmetadata:\n  name: x\n";
        let gz = gzip(raw);
        use base64::Engine;
        let b64 = base64::engine::general_purpose::STANDARD.encode(gz);
        let resource = BundleResource { name: "svc.yaml".to_string(), content: b64, encoding: ResourceEncoding::GzipBase64 };
        let manifest = decode_resources(&[resource]).unwrap();
        assert_eq!(manifest.resources[0].content, String::from_utf8(raw.to_vec()).unwrap());
    }
}

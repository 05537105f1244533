//! LFS objects in a local content-addressed store
//!
//! Objects are shared between repositories on disk, but each repository
//! keeps its own index of the oids it has uploaded and verified. Batch
//! downloads only resolve indexed objects, so knowing an oid is not enough
//! to read it through another repository.

use super::{BodyReader, LfsBackend, LfsBatchRequest};
use crate::repo::RepoRef;
use crate::{Error, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use hubgate_lfs::pointer::validate_oid;
use hubgate_lfs::{Action, LfsError, ObjectResponse, ObjectStore, Pointer, UrlSigner, LFS_MEDIA_TYPE};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tracing::debug;

/// Route prefix of the signed object links served by the gateway
pub const STORAGE_PREFIX: &str = "/_storage/lfs";

const OBJECT_MISSING: &str = "Object does not exist";

pub struct LocalLfsBackend {
    store: ObjectStore,
    index_root: PathBuf,
    signer: UrlSigner,
    public_domain: String,
    link_expiry: Duration,
    max_object_size: u64,
}

impl LocalLfsBackend {
    /// `lfs_root` holds `objects/`, `tmp/` and the per-repository `index/`.
    pub fn new(
        lfs_root: impl Into<PathBuf>,
        signer: UrlSigner,
        public_domain: &str,
        link_expiry: Duration,
        max_object_size: u64,
    ) -> Self {
        let lfs_root = lfs_root.into();
        Self {
            store: ObjectStore::new(lfs_root.clone()),
            index_root: lfs_root.join("index"),
            signer,
            public_domain: public_domain.trim_end_matches('/').to_string(),
            link_expiry,
            max_object_size,
        }
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    fn index_path(&self, repo: &RepoRef, oid: &str) -> Result<PathBuf> {
        validate_oid(oid)?;
        Ok(self.index_root.join(repo.git_path()).join(oid))
    }

    /// Size recorded for `oid` in `repo`, if the object is indexed there and
    /// still present in the store
    async fn indexed_size(&self, repo: &RepoRef, oid: &str) -> Result<Option<u64>> {
        let marker = match fs::read_to_string(self.index_path(repo, oid)?).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Internal(e.into())),
        };
        let Ok(size) = marker.trim().parse::<u64>() else {
            return Ok(None);
        };
        match self.store.size(oid).await? {
            Some(stored) if stored == size => Ok(Some(size)),
            _ => Ok(None),
        }
    }

    async fn record(&self, repo: &RepoRef, pointer: &Pointer) -> Result<()> {
        let path = self.index_path(repo, &pointer.oid)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Internal(e.into()))?;
        }
        fs::write(&path, pointer.byte_size().to_string())
            .await
            .map_err(|e| Error::Internal(e.into()))?;
        debug!(%repo, oid = %pointer.oid, "indexed lfs object");
        Ok(())
    }

    fn object_href(&self, repo: &RepoRef, pointer: &Pointer) -> String {
        format!(
            "{}/{}/info/lfs/objects/{}/{}",
            self.public_domain,
            repo.git_path(),
            pointer.oid,
            pointer.size
        )
    }

    fn verify_href(&self, repo: &RepoRef) -> String {
        format!("{}/{}/info/lfs/verify", self.public_domain, repo.git_path())
    }

    /// Signed, expiring link to the object bytes
    pub fn storage_link(&self, oid: &str, save_as: Option<&str>) -> Action {
        let expiry = chrono::Duration::from_std(self.link_expiry)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let expires_at = Utc::now() + expiry;
        let expires = expires_at.timestamp();
        let signature = self.signer.sign(oid, expires, save_as);

        let mut href = format!(
            "{}{}/{}?expires={}&signature={}",
            self.public_domain, STORAGE_PREFIX, oid, expires, signature
        );
        if let Some(name) = save_as {
            href.push_str("&filename=");
            href.push_str(&base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(name));
        }
        Action::new(href).expires_at(expires_at)
    }

    /// Whether a link produced by [`LocalLfsBackend::storage_link`] is
    /// intact and unexpired
    pub fn check_link(
        &self,
        oid: &str,
        expires: i64,
        filename: Option<&str>,
        signature: &str,
    ) -> bool {
        self.signer
            .verify(oid, expires, filename, signature, Utc::now().timestamp())
    }

    /// Only basic transfers are offered, so the limit holds for every upload
    fn check_size(&self, pointer: &Pointer) -> std::result::Result<(), LfsError> {
        let size = pointer.byte_size();
        if size > self.max_object_size {
            return Err(LfsError::ObjectTooLarge {
                size,
                limit: self.max_object_size,
            });
        }
        Ok(())
    }

    async fn resolve_upload(
        &self,
        request: &LfsBatchRequest,
        pointer: &Pointer,
    ) -> Result<ObjectResponse> {
        if let Err(err) = self.check_size(pointer) {
            return Ok(ObjectResponse::from_error(pointer, &err));
        }
        if self.indexed_size(&request.repo, &pointer.oid).await?.is_some() {
            return Ok(ObjectResponse::present(pointer));
        }

        let mut upload = Action::new(self.object_href(&request.repo, pointer));
        let mut verify = Action::new(self.verify_href(&request.repo))
            .with_header("Accept", LFS_MEDIA_TYPE);
        if let Some(auth) = &request.authorization {
            upload = upload.with_header("Authorization", auth.clone());
            verify = verify.with_header("Authorization", auth.clone());
        }
        Ok(ObjectResponse::with_action(pointer, "upload", upload).and_action("verify", verify))
    }

    async fn resolve_download(
        &self,
        request: &LfsBatchRequest,
        pointer: &Pointer,
    ) -> Result<ObjectResponse> {
        match self.indexed_size(&request.repo, &pointer.oid).await? {
            Some(size) if size == pointer.byte_size() => Ok(ObjectResponse::with_action(
                pointer,
                "download",
                self.storage_link(&pointer.oid, None),
            )),
            _ => Ok(ObjectResponse::error(pointer, 404, OBJECT_MISSING)),
        }
    }
}

#[async_trait]
impl LfsBackend for LocalLfsBackend {
    async fn resolve_objects(
        &self,
        request: &LfsBatchRequest,
        is_upload: bool,
    ) -> Result<Vec<ObjectResponse>> {
        let mut objects = Vec::with_capacity(request.objects.len());
        for pointer in &request.objects {
            if let Err(err) = pointer.validate() {
                objects.push(ObjectResponse::from_error(pointer, &err));
                continue;
            }
            let resolved = if is_upload {
                self.resolve_upload(request, pointer).await?
            } else {
                self.resolve_download(request, pointer).await?
            };
            objects.push(resolved);
        }
        Ok(objects)
    }

    async fn upload(&self, repo: &RepoRef, pointer: &Pointer, body: BodyReader) -> Result<()> {
        pointer.validate()?;
        self.check_size(pointer)?;
        self.store.put(&pointer.oid, pointer.byte_size(), body).await?;
        self.record(repo, pointer).await
    }

    async fn download_url(
        &self,
        repo: &RepoRef,
        pointer: &Pointer,
        save_as: Option<&str>,
    ) -> Result<String> {
        pointer.validate()?;
        match self.indexed_size(repo, &pointer.oid).await? {
            Some(size) if size == pointer.byte_size() => {
                Ok(self.storage_link(&pointer.oid, save_as).href)
            }
            _ => Err(Error::not_found(OBJECT_MISSING)),
        }
    }

    async fn verify(&self, repo: &RepoRef, pointer: &Pointer) -> Result<()> {
        pointer.validate()?;
        match self.store.size(&pointer.oid).await? {
            None => Err(Error::not_found(OBJECT_MISSING)),
            Some(actual) if actual != pointer.byte_size() => Err(LfsError::SizeMismatch {
                expected: pointer.byte_size(),
                actual,
            }
            .into()),
            Some(_) => self.record(repo, pointer).await,
        }
    }
}

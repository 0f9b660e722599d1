//! elFinder connector for the image browser.
//!
//! Serves `GET|POST /api/elfinder?cmd=...` for admins. Each entry under
//! `imageBrowser.containers` is a volume: a `storage` directory relative to
//! `HOME_PATH`, published at `url`.
//!
//! Supported commands: `open`, `ls`, `mkdir`, `rm`, `file`. Protocol errors
//! are answered with `{"error": "<code>"}` and status 200, as the client
//! expects.

use crate::{
    config::Configuration, error::AppError, middleware::session::ClientContext,
    pages::context::Params, state::AppState,
};
use axum::{
    Extension, Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, Uri, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};
use std::path::{Component, Path, PathBuf};

const API_VERSION: &str = "2.1";

/// A storage root exposed to the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub id: String,
    pub root: PathBuf,
    pub url: String,
}

impl Volume {
    /// `<volume>_`
    fn volume_id(&self) -> String {
        format!("{}_", self.id)
    }

    /// `<volume>_<hex(path)>`, where `path` is relative to the root and
    /// starts with `/`.
    pub fn hash(&self, relative: &str) -> String {
        format!("{}{}", self.volume_id(), hex::encode(relative))
    }

    /// Filesystem path for a relative path. Anything that could leave the
    /// root is rejected.
    pub fn resolve(&self, relative: &str) -> Option<PathBuf> {
        let mut path = self.root.clone();
        for component in Path::new(relative.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        Some(path)
    }

    fn file_url(&self, relative: &str) -> String {
        format!(
            "{}/{}",
            self.url.trim_end_matches('/'),
            relative.trim_start_matches('/')
        )
    }
}

/// Volumes from `imageBrowser.containers`.
pub fn volumes(config: &Configuration, home_path: &Path) -> Vec<Volume> {
    let Some(Value::Object(containers)) = config.get("imageBrowser.containers") else {
        return Vec::new();
    };
    containers
        .iter()
        .filter_map(|(id, container)| {
            let storage = container.get("storage").and_then(Value::as_str)?;
            Some(Volume {
                id: id.clone(),
                root: home_path.join(storage.trim_start_matches('/')),
                url: container
                    .get("url")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
        })
        .collect()
}

/// Split a hash into its volume and decoded relative path.
pub fn decode_hash<'a>(volumes: &'a [Volume], hash: &str) -> Option<(&'a Volume, String)> {
    let (id, encoded) = hash.rsplit_once('_')?;
    let volume = volumes.iter().find(|v| v.id == id)?;
    let relative = String::from_utf8(hex::decode(encoded).ok()?).ok()?;
    if !relative.starts_with('/') {
        return None;
    }
    volume.resolve(&relative)?;
    Some((volume, relative))
}

fn parent_of(relative: &str) -> Option<String> {
    if relative == "/" {
        return None;
    }
    let trimmed = relative.trim_end_matches('/');
    Some(match trimmed.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(index) => trimmed[..index].to_string(),
    })
}

fn join(relative: &str, name: &str) -> String {
    format!("{}/{}", relative.trim_end_matches('/'), name)
}

/// A valid new entry name: no separators, not `.` or `..`.
fn valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

pub fn mime_type(name: &str) -> &'static str {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "css" => "text/css",
        "js" => "application/javascript",
        _ => "application/octet-stream",
    }
}

/// One entry as the client expects it.
#[derive(Debug, Serialize, PartialEq)]
pub struct FileInfo {
    pub name: String,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phash: Option<String>,
    pub mime: String,
    pub ts: i64,
    pub size: u64,
    pub dirs: u8,
    pub read: u8,
    pub write: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumeid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

async fn has_subdirectories(path: &Path) -> bool {
    let Ok(mut entries) = tokio::fs::read_dir(path).await else {
        return false;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
            return true;
        }
    }
    false
}

async fn file_info(volume: &Volume, relative: &str) -> Result<FileInfo, AppError> {
    let path = volume.resolve(relative).ok_or(AppError::NotFound)?;
    let metadata = tokio::fs::metadata(&path).await?;
    let is_root = relative == "/";
    let name = if is_root {
        volume.id.clone()
    } else {
        relative.rsplit('/').next().unwrap_or_default().to_string()
    };
    let ts = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();

    Ok(FileInfo {
        hash: volume.hash(relative),
        phash: parent_of(relative).map(|parent| volume.hash(&parent)),
        mime: if metadata.is_dir() {
            "directory".to_string()
        } else {
            mime_type(&name).to_string()
        },
        ts,
        size: if metadata.is_dir() { 0 } else { metadata.len() },
        dirs: u8::from(metadata.is_dir() && has_subdirectories(&path).await),
        read: 1,
        write: 1,
        volumeid: is_root.then(|| volume.volume_id()),
        url: (!metadata.is_dir()).then(|| volume.file_url(relative)),
        name,
    })
}

/// Entries of a directory, sorted by name. Dot files are hidden.
async fn list(volume: &Volume, relative: &str) -> Result<Vec<FileInfo>, AppError> {
    let path = volume.resolve(relative).ok_or(AppError::NotFound)?;
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(&path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort();

    let mut files = Vec::with_capacity(names.len());
    for name in names {
        files.push(file_info(volume, &join(relative, &name)).await?);
    }
    Ok(files)
}

fn protocol_error(code: &str) -> Response {
    Json(json!({ "error": code })).into_response()
}

/// Run one connector command.
pub async fn run_command(volumes: &[Volume], params: &Params) -> Result<Response, AppError> {
    let command = params.get("cmd").unwrap_or_default();
    let target = params.get("target").filter(|t| !t.is_empty());

    match command {
        "open" => {
            let (volume, relative) = match target {
                Some(hash) => match decode_hash(volumes, hash) {
                    Some(found) => found,
                    None => return Ok(protocol_error("errFolderNotFound")),
                },
                None if params.get_bool("init") => match volumes.first() {
                    Some(volume) => (volume, "/".to_string()),
                    None => return Ok(protocol_error("errNoVolumes")),
                },
                None => return Ok(protocol_error("errCmdParams")),
            };
            ensure_root(volume).await?;

            let cwd = file_info(volume, &relative).await?;
            let mut files = list(volume, &relative).await?;
            if params.get_bool("tree") {
                for other in volumes {
                    ensure_root(other).await?;
                    files.insert(0, file_info(other, "/").await?);
                }
            }

            let mut body = json!({
                "cwd": cwd,
                "files": files,
                "options": {
                    "path": format!("{}{}", volume.id, relative.trim_end_matches('/')),
                    "url": volume.url,
                    "separator": "/",
                    "disabled": ["upload", "rename", "paste", "duplicate", "archive", "extract"],
                },
            });
            if params.get_bool("init") {
                body["api"] = json!(API_VERSION);
            }
            Ok(Json(body).into_response())
        }
        "ls" => {
            let Some((volume, relative)) = target.and_then(|t| decode_hash(volumes, t)) else {
                return Ok(protocol_error("errFolderNotFound"));
            };
            let names: Vec<String> = list(volume, &relative)
                .await?
                .into_iter()
                .map(|f| f.name)
                .collect();
            Ok(Json(json!({ "list": names })).into_response())
        }
        "mkdir" => {
            let Some((volume, relative)) = target.and_then(|t| decode_hash(volumes, t)) else {
                return Ok(protocol_error("errFolderNotFound"));
            };
            let name = params.get("name").unwrap_or_default().trim();
            if !valid_name(name) {
                return Ok(protocol_error("errInvName"));
            }
            let created = join(&relative, name);
            let path = volume.resolve(&created).ok_or(AppError::NotFound)?;
            if tokio::fs::try_exists(&path).await? {
                return Ok(protocol_error("errExists"));
            }
            tokio::fs::create_dir(&path).await?;
            tracing::info!(volume = %volume.id, path = %created, "Directory created");
            Ok(Json(json!({ "added": [file_info(volume, &created).await?] })).into_response())
        }
        "rm" => {
            let mut removed = Vec::new();
            for hash in params.get_all("targets") {
                let Some((volume, relative)) = decode_hash(volumes, hash) else {
                    return Ok(protocol_error("errFileNotFound"));
                };
                if relative == "/" {
                    return Ok(protocol_error("errPerm"));
                }
                let path = volume.resolve(&relative).ok_or(AppError::NotFound)?;
                if tokio::fs::metadata(&path).await?.is_dir() {
                    tokio::fs::remove_dir_all(&path).await?;
                } else {
                    tokio::fs::remove_file(&path).await?;
                }
                tracing::info!(volume = %volume.id, path = %relative, "Removed");
                removed.push(hash.to_string());
            }
            Ok(Json(json!({ "removed": removed })).into_response())
        }
        "file" => {
            let Some((volume, relative)) = target.and_then(|t| decode_hash(volumes, t)) else {
                return Ok(protocol_error("errFileNotFound"));
            };
            let path = volume.resolve(&relative).ok_or(AppError::NotFound)?;
            if !tokio::fs::try_exists(&path).await? || tokio::fs::metadata(&path).await?.is_dir() {
                return Ok(protocol_error("errFileNotFound"));
            }
            let body = tokio::fs::read(&path).await?;
            Ok(([(header::CONTENT_TYPE, mime_type(&relative))], body).into_response())
        }
        _ => Ok(protocol_error("errUnknownCmd")),
    }
}

/// Volume roots are created on first use.
async fn ensure_root(volume: &Volume) -> Result<(), AppError> {
    tokio::fs::create_dir_all(&volume.root).await?;
    Ok(())
}

/// `GET|POST /api/elfinder`
///
/// # Errors
///
/// `AccessDenied` (403) for anyone but admins.
pub async fn connector(
    State(state): State<AppState>,
    Extension(client): Extension<ClientContext>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    if !client.is_admin {
        return Err(AppError::AccessDenied);
    }

    let mut params = Params::parse(uri.query().unwrap_or_default());
    let is_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"));
    if is_form {
        params.extend(Params::parse(&String::from_utf8_lossy(&body)));
    }

    let volumes = volumes(&state.config, &state.settings.home_path);
    run_command(&volumes, &params).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::{Body, to_bytes}, http::{Request, StatusCode}, routing::get};
    use tower::ServiceExt;

    fn volume(root: &Path) -> Volume {
        Volume {
            id: "images".into(),
            root: root.to_path_buf(),
            url: "/images/".into(),
        }
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn hashes_round_trip_and_reject_escapes() {
        let volumes = vec![volume(Path::new("/srv/site/images"))];
        let hash = volumes[0].hash("/banners/top.png");
        assert_eq!(hash, format!("images_{}", hex::encode("/banners/top.png")));
        let (found, relative) = decode_hash(&volumes, &hash).unwrap();
        assert_eq!(found.id, "images");
        assert_eq!(relative, "/banners/top.png");

        let escape = volumes[0].hash("/../secret");
        assert!(decode_hash(&volumes, &escape).is_none());
        assert!(decode_hash(&volumes, "other_2f").is_none());
        assert!(decode_hash(&volumes, "images_zz").is_none());
        assert_eq!(
            volumes[0].resolve("/a/./b"),
            Some(PathBuf::from("/srv/site/images/a/b"))
        );
    }

    #[test]
    fn volumes_come_from_configuration() {
        let config = Configuration::from_value(json!({
            "imageBrowser": { "containers": {
                "images": { "storage": "images", "url": "/images/" },
                "broken": { "url": "/x/" }
            } }
        }));
        assert_eq!(
            volumes(&config, Path::new("/home/site")),
            vec![Volume {
                id: "images".into(),
                root: PathBuf::from("/home/site/images"),
                url: "/images/".into(),
            }]
        );
    }

    #[test]
    fn parents_and_names() {
        assert_eq!(parent_of("/"), None);
        assert_eq!(parent_of("/a").as_deref(), Some("/"));
        assert_eq!(parent_of("/a/b").as_deref(), Some("/a"));
        assert!(valid_name("photos"));
        assert!(!valid_name(".."));
        assert!(!valid_name("a/b"));
        assert_eq!(mime_type("Logo.PNG"), "image/png");
        assert_eq!(mime_type("notes"), "application/octet-stream");
    }

    #[tokio::test]
    async fn open_mkdir_ls_and_rm() {
        let dir = tempfile::tempdir().unwrap();
        let volumes = vec![volume(dir.path())];
        std::fs::write(dir.path().join("a.png"), b"png").unwrap();

        let open = json_body(
            run_command(&volumes, &Params::parse("cmd=open&init=1&tree=1"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(open["api"], "2.1");
        assert_eq!(open["cwd"]["hash"], volumes[0].hash("/"));
        assert_eq!(open["cwd"]["volumeid"], "images_");
        let names: Vec<&str> = open["files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["images", "a.png"]);
        assert_eq!(open["files"][1]["url"], "/images/a.png");
        assert_eq!(open["files"][1]["mime"], "image/png");

        let root = volumes[0].hash("/");
        let mkdir = json_body(
            run_command(&volumes, &Params::from_pairs(&[("cmd", "mkdir"), ("target", root.as_str()), ("name", "banners")]))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(mkdir["added"][0]["name"], "banners");
        assert_eq!(mkdir["added"][0]["phash"], root);
        assert!(dir.path().join("banners").is_dir());

        let ls = json_body(
            run_command(&volumes, &Params::from_pairs(&[("cmd", "ls"), ("target", root.as_str())]))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(ls["list"], json!(["a.png", "banners"]));

        let file = volumes[0].hash("/a.png");
        let rm = json_body(
            run_command(&volumes, &Params::from_pairs(&[("cmd", "rm"), ("targets[]", file.as_str())]))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(rm["removed"], json!([file]));
        assert!(!dir.path().join("a.png").exists());

        let root_rm = json_body(
            run_command(&volumes, &Params::from_pairs(&[("cmd", "rm"), ("targets[]", root.as_str())]))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(root_rm["error"], "errPerm");
    }

    #[tokio::test]
    async fn file_returns_contents_and_bad_names_fail() {
        let dir = tempfile::tempdir().unwrap();
        let volumes = vec![volume(dir.path())];
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let target = volumes[0].hash("/a.txt");
        let response = run_command(&volumes, &Params::from_pairs(&[("cmd", "file"), ("target", target.as_str())]))
            .await
            .unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"hello");

        let root = volumes[0].hash("/");
        let bad = json_body(
            run_command(&volumes, &Params::from_pairs(&[("cmd", "mkdir"), ("target", root.as_str()), ("name", "..")]))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(bad["error"], "errInvName");

        let unknown = json_body(run_command(&volumes, &Params::parse("cmd=paste")).await.unwrap()).await;
        assert_eq!(unknown["error"], "errUnknownCmd");
    }

    #[tokio::test]
    async fn connector_is_admin_only() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::for_tests(
            json!({ "imageBrowser": { "containers": { "images": { "storage": "images", "url": "/images/" } } } }),
            dir.path().to_path_buf(),
        );
        let app = |client: ClientContext| {
            Router::new()
                .route("/api/elfinder", get(connector).post(connector))
                .layer(Extension(client))
                .with_state(state.clone())
        };

        let denied = app(ClientContext::default())
            .oneshot(
                Request::get("/api/elfinder?cmd=open&init=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(denied).await["error"]["code"], "access_denied");

        let admin = ClientContext {
            is_admin: true,
            ..ClientContext::default()
        };
        let opened = app(admin)
            .oneshot(
                Request::post("/api/elfinder")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("cmd=open&init=1"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(opened.status(), StatusCode::OK);
        let body = json_body(opened).await;
        assert_eq!(body["cwd"]["name"], "images");
        assert!(dir.path().join("images").is_dir());
    }
}

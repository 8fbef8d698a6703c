//! Static file serving.
//!
//! [FileSystem] abstracts where files come from; [Dir] reads a directory on disk and
//! [OnlyFiles] wraps any other implementation so that directories never list their children.
use crate::{context::Context, errors::Error, handler::Handler, path::WILDCARD, HTTPResult};
use http::{header, Method, Response, StatusCode};
use hyper::Body;
use md5::{Digest, Md5};
use std::{
    io,
    path::{Component, Path, PathBuf},
    sync::Arc,
};
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;

/// FileSystem resolves request paths to files.
pub trait FileSystem: Send + Sync + 'static {
    /// Resolve `name` (relative, `/`-separated) to a path on disk. Fails if the entry does not
    /// exist or `name` tries to escape the root.
    fn open(&self, name: &str) -> io::Result<PathBuf>;

    /// The names of the entries in the directory `name`. Subdirectories end in `/`.
    fn read_dir(&self, name: &str) -> io::Result<Vec<String>>;
}

/// Dir serves the files below a root directory.
#[derive(Debug, Clone)]
pub struct Dir {
    root: PathBuf,
}

impl Dir {
    pub fn new<P>(root: P) -> Self
    where
        P: Into<PathBuf>,
    {
        Self { root: root.into() }
    }

    fn resolve(&self, name: &str) -> io::Result<PathBuf> {
        let mut path = self.root.clone();

        for component in Path::new(name).components() {
            match component {
                Component::Normal(c) => path.push(c),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        format!("'{}' escapes the served directory", name),
                    ))
                }
            }
        }

        Ok(path)
    }
}

impl FileSystem for Dir {
    fn open(&self, name: &str) -> io::Result<PathBuf> {
        let path = self.resolve(name)?;
        std::fs::metadata(&path)?;
        Ok(path)
    }

    fn read_dir(&self, name: &str) -> io::Result<Vec<String>> {
        let mut names = Vec::new();

        for entry in std::fs::read_dir(self.resolve(name)?)? {
            let entry = entry?;
            let mut name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type()?.is_dir() {
                name.push('/');
            }
            names.push(name);
        }

        names.sort();
        Ok(names)
    }
}

/// OnlyFiles hides directory contents: reading a directory always yields nothing, whatever the
/// wrapped filesystem holds.
#[derive(Debug, Clone)]
pub struct OnlyFiles<F>(F);

impl<F> OnlyFiles<F>
where
    F: FileSystem,
{
    pub fn new(fs: F) -> Self {
        Self(fs)
    }
}

impl<F> FileSystem for OnlyFiles<F>
where
    F: FileSystem,
{
    fn open(&self, name: &str) -> io::Result<PathBuf> {
        self.0.open(name)
    }

    fn read_dir(&self, _name: &str) -> io::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

fn server_error(err: io::Error) -> Error {
    Error::new_status(StatusCode::INTERNAL_SERVER_ERROR, err)
}

async fn serve_file(ctx: Context, path: &Path) -> HTTPResult {
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return ctx.not_found().await,
        Err(e) => return Err(server_error(e)),
    };

    let meta = file.metadata().await.map_err(server_error)?;
    if meta.is_dir() {
        return ctx.not_found().await;
    }

    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, meta.len());

    if ctx.method() == Method::HEAD {
        return Ok(builder.body(Body::empty())?);
    }

    Ok(builder.body(Body::wrap_stream(ReaderStream::new(file)))?)
}

/// Answers HEAD for a single file with its `ETag` (the MD5 of its content) and
/// `Content-Length`, and no body.
async fn serve_file_metadata(ctx: Context, path: &Path) -> HTTPResult {
    let mut file = tokio::fs::File::open(path).await.map_err(server_error)?;
    let meta = file.metadata().await.map_err(server_error)?;

    if meta.is_dir() {
        return ctx.not_found().await;
    }

    let mut hasher = Md5::new();
    let mut buf = vec![0; 8192];
    loop {
        let n = file.read(&mut buf).await.map_err(server_error)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::ETAG, hex::encode(hasher.finalize()))
        .header(header::CONTENT_LENGTH, meta.len())
        .body(Body::empty())?)
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

async fn serve_dir(ctx: Context, fs: &dyn FileSystem, name: &str, path: &Path) -> HTTPResult {
    let index = path.join("index.html");
    if tokio::fs::metadata(&index)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
    {
        return serve_file(ctx, &index).await;
    }

    let mut listing = String::from("<pre>\n");
    for entry in fs.read_dir(name).map_err(server_error)? {
        let entry = escape(&entry);
        listing.push_str(&format!("<a href=\"{}\">{}</a>\n", entry, entry));
    }
    listing.push_str("</pre>\n");

    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .header(header::CONTENT_LENGTH, listing.len());

    if ctx.method() == Method::HEAD {
        return Ok(builder.body(Body::empty())?);
    }

    Ok(builder.body(Body::from(listing))?)
}

pub(crate) fn file_handler(file: PathBuf) -> Handler {
    let file = Arc::new(file);
    Handler::new(move |ctx: Context| {
        let file = file.clone();
        async move { serve_file(ctx, &file).await }
    })
}

pub(crate) fn file_metadata_handler(file: PathBuf) -> Handler {
    let file = Arc::new(file);
    Handler::new(move |ctx: Context| {
        let file = file.clone();
        async move { serve_file_metadata(ctx, &file).await }
    })
}

/// Serves the entry named by the wildcard parameter out of `fs`.
pub(crate) fn fs_handler(fs: Arc<dyn FileSystem>) -> Handler {
    Handler::new(move |ctx: Context| {
        let fs = fs.clone();
        async move {
            let name = ctx.param(WILDCARD).unwrap_or_default().to_string();

            let path = match fs.open(&name) {
                Ok(path) => path,
                Err(_) => return ctx.not_found().await,
            };

            let meta = tokio::fs::metadata(&path).await.map_err(server_error)?;
            if meta.is_dir() {
                serve_dir(ctx, fs.as_ref(), &name, &path).await
            } else {
                serve_file(ctx, &path).await
            }
        }
    })
}

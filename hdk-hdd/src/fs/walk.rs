use super::extract::CopyFailure;
use super::{Entry, Filesystem, join_path, sort_entries};
use crate::error::HddError;

/// An entry reached by [`TreeWalker`], with symlinks already resolved.
#[derive(Debug, Clone)]
pub struct WalkItem {
    /// Names from the walk root down to this entry.
    pub components: Vec<String>,
    pub entry: Entry,
}

struct Frame {
    components: Vec<String>,
    node: u64,
    children: std::vec::IntoIter<Entry>,
}

/// Depth-first walk below a directory.
///
/// Symlinks are followed. A link that resolves to a directory already on
/// the current path is reported as [`HddError::RecursiveSymlink`] for that
/// entry and not descended into; other per-entry failures are reported the
/// same way and the walk continues. Directories are yielded before their
/// children; siblings come in listing order.
pub struct TreeWalker<'a, F: Filesystem + ?Sized> {
    fs: &'a mut F,
    base: String,
    stack: Vec<Frame>,
}

impl<'a, F: Filesystem + ?Sized> TreeWalker<'a, F> {
    /// Start a walk at directory `root`, whose volume path is `base`.
    pub fn new(fs: &'a mut F, base: &str, root: &Entry) -> Result<Self, HddError> {
        let mut walker = Self {
            fs,
            base: base.to_string(),
            stack: Vec::new(),
        };
        let children = walker.children(root)?;
        walker.stack.push(Frame {
            components: Vec::new(),
            node: root.node,
            children,
        });
        Ok(walker)
    }

    /// The filesystem being walked, for reading the yielded entries.
    pub fn filesystem(&mut self) -> &mut F {
        self.fs
    }

    fn children(&mut self, dir: &Entry) -> Result<std::vec::IntoIter<Entry>, HddError> {
        let mut entries = self.fs.read_dir(dir)?;
        sort_entries(&mut entries);
        Ok(entries.into_iter())
    }

    fn volume_path(&self, components: &[String]) -> String {
        components
            .iter()
            .fold(self.base.clone(), |path, name| join_path(&path, name))
    }

    fn visit(&mut self, entry: Entry, components: &[String]) -> Result<Entry, HddError> {
        let resolved = if entry.is_symlink() {
            self.fs.follow(&entry)?
        } else {
            entry
        };

        if resolved.is_dir() {
            if self.stack.iter().any(|frame| frame.node == resolved.node) {
                return Err(HddError::RecursiveSymlink(self.volume_path(components)));
            }
            let children = self.children(&resolved)?;
            self.stack.push(Frame {
                components: components.to_vec(),
                node: resolved.node,
                children,
            });
        }

        Ok(resolved)
    }
}

impl<F: Filesystem + ?Sized> Iterator for TreeWalker<'_, F> {
    type Item = Result<WalkItem, CopyFailure>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;
            let Some(entry) = frame.children.next() else {
                self.stack.pop();
                continue;
            };
            if entry.is_dot() {
                continue;
            }

            let mut components = frame.components.clone();
            components.push(entry.name.clone());

            return Some(match self.visit(entry, &components) {
                Ok(entry) => Ok(WalkItem { components, entry }),
                Err(error) => Err(CopyFailure {
                    path: self.volume_path(&components),
                    error,
                }),
            });
        }
    }
}

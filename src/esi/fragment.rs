use std::sync::Arc;

/// A parsed page: literal text interleaved with include points.
///
/// Trees are immutable once built and shared behind [`Arc`], so the same
/// cached tree can be rendered by many requests at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Output verbatim.
    Text(String),
    /// Replaced by the resolved content of another URL.
    Include(Include),
    /// Children rendered in order.
    Sequence(Vec<Arc<Fragment>>),
}

impl Fragment {
    /// Builds a sequence, collapsing a single child into itself.
    pub fn sequence(mut children: Vec<Fragment>) -> Fragment {
        if children.len() == 1 {
            if let Some(only) = children.pop() {
                return only;
            }
        }
        Fragment::Sequence(children.into_iter().map(Arc::new).collect())
    }
}

/// An `<esi:include>` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
    pub src: String,
    /// Tried when `src` fails.
    pub alt: Option<String>,
    /// `onerror="continue"`: drop the include instead of failing the page.
    pub continue_on_error: bool,
}

impl Include {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            alt: None,
            continue_on_error: false,
        }
    }
}

/// What the fragment cache stores per URL: the parsed tree and the content
/// type the handler declared when it produced it.
#[derive(Debug, Clone)]
pub struct CachedPage {
    fragment: Arc<Fragment>,
    content_type: Option<String>,
}

impl CachedPage {
    pub fn new(fragment: Fragment, content_type: Option<String>) -> Self {
        Self {
            fragment: Arc::new(fragment),
            content_type,
        }
    }

    pub fn fragment(&self) -> &Arc<Fragment> {
        &self.fragment
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }
}

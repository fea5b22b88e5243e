// src/render/mock.rs
//! Scripted renderer for tests and demos. Each `fetch` pops the next step
//! off a shared script; counters record how often renderers were created and
//! pages fetched.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{Document, RenderError, Renderer, RendererFactory};

#[derive(Debug, Clone)]
pub enum MockStep {
    /// Successive `extract_text` answers for this page; `None` once drained.
    Text(Vec<Option<String>>),
    /// `extract_all` answer for this page.
    List(Vec<String>),
    /// Navigation fails.
    FetchError,
    /// Navigation never answers.
    Hang,
}

#[derive(Debug, Default)]
struct Inner {
    script: Mutex<VecDeque<MockStep>>,
    creates: AtomicU32,
    fetches: AtomicU32,
    failing_creates: AtomicU32,
}

#[derive(Debug, Clone, Default)]
pub struct MockRendererFactory {
    inner: Arc<Inner>,
}

impl MockRendererFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, step: MockStep) -> &Self {
        self.inner
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(step);
        self
    }

    pub fn push_text(&self, text: &str) -> &Self {
        self.push(MockStep::Text(vec![Some(text.to_string())]))
    }

    /// Page loads but nothing is ever extractable.
    pub fn push_empty(&self) -> &Self {
        self.push(MockStep::Text(Vec::new()))
    }

    pub fn push_fetch_error(&self) -> &Self {
        self.push(MockStep::FetchError)
    }

    /// Make the next `n` `create` calls fail.
    pub fn fail_next_creates(&self, n: u32) -> &Self {
        self.inner.failing_creates.store(n, Ordering::SeqCst);
        self
    }

    pub fn creates(&self) -> u32 {
        self.inner.creates.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> u32 {
        self.inner.fetches.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.inner
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl RendererFactory for MockRendererFactory {
    async fn create(&self) -> Result<Box<dyn Renderer>, RenderError> {
        let failing = self.inner.failing_creates.load(Ordering::SeqCst);
        if failing > 0 {
            self.inner.failing_creates.store(failing - 1, Ordering::SeqCst);
            return Err(RenderError::Session("mock create failure".into()));
        }
        self.inner.creates.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockRenderer {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MockRenderer {
    inner: Arc<Inner>,
}

#[async_trait]
impl Renderer for MockRenderer {
    async fn fetch(&self, _url: &str) -> Result<Box<dyn Document>, RenderError> {
        self.inner.fetches.fetch_add(1, Ordering::SeqCst);
        let step = self
            .inner
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match step {
            Some(MockStep::Text(answers)) => Ok(Box::new(MockDocument {
                answers: Mutex::new(answers.into()),
                list: Vec::new(),
            })),
            Some(MockStep::List(list)) => Ok(Box::new(MockDocument {
                answers: Mutex::new(VecDeque::new()),
                list,
            })),
            Some(MockStep::FetchError) => Err(RenderError::Navigation("mock navigation failure".into())),
            Some(MockStep::Hang) => {
                std::future::pending::<()>().await;
                Err(RenderError::Navigation("unreachable".into()))
            }
            None => Err(RenderError::Navigation("mock script exhausted".into())),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

struct MockDocument {
    answers: Mutex<VecDeque<Option<String>>>,
    list: Vec<String>,
}

#[async_trait]
impl Document for MockDocument {
    async fn extract_text(&self, _locator: &str) -> Option<String> {
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .flatten()
    }

    async fn extract_all(&self, _locator: &str) -> Vec<String> {
        self.list.clone()
    }
}

//! In-memory [`BrowserDriver`] whose page is described up front by the caller.
//!
//! Frames can be made to appear only after a number of `list_frames` calls,
//! elements carry visibility, text and attributes, and any operation can be
//! told to fail once with a chosen [`DriverError`]. Console lines are pushed to
//! every subscribed sink through [`ScriptedDriver::emit_console`].

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc::Sender;

use super::{BrowserDriver, ConsoleMessage, ContextHandle, DriverError, ElementHandle};

const TOP_LEVEL_ID: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Goto,
    CurrentUrl,
    TopLevel,
    ListFrames,
    Locate,
    IsVisible,
    TextContent,
    GetAttribute,
    Closest,
    Evaluate,
    SubscribeConsole,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedElement {
    pub visible: bool,
    pub text: Option<String>,
    pub attributes: HashMap<String, String>,
    /// Becomes visible only after this long; probes with a shorter timeout miss it.
    pub appears_after: Option<Duration>,
}

impl ScriptedElement {
    pub fn visible(text: impl Into<String>) -> Self {
        Self {
            visible: true,
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn hidden(text: impl Into<String>) -> Self {
        Self {
            visible: false,
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Visible element without text content, e.g. an SVG shape.
    pub fn bare() -> Self {
        Self {
            visible: true,
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn appearing_after(mut self, delay: Duration) -> Self {
        self.appears_after = Some(delay);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub context: String,
    pub script: String,
}

#[derive(Debug)]
struct Frame {
    handle: ContextHandle,
    listed_after: u32,
    destroyed: bool,
}

#[derive(Debug)]
struct State {
    url: String,
    closed: bool,
    frame_lists: u32,
    frames: Vec<Frame>,
    next_frame: u32,
    next_element: u64,
    elements: HashMap<u64, (String, ScriptedElement)>,
    by_selector: HashMap<(String, String), Vec<u64>>,
    ancestors: HashMap<(u64, String), u64>,
    failures: HashMap<Operation, VecDeque<DriverError>>,
    calls: HashMap<Operation, u64>,
    console: Vec<Sender<ConsoleMessage>>,
    evaluations: Vec<Evaluation>,
    evaluate_result: Value,
    navigations: Vec<String>,
}

impl State {
    fn enter(&mut self, op: Operation) -> Result<(), DriverError> {
        *self.calls.entry(op).or_default() += 1;

        if self.closed {
            return Err(DriverError::Closed);
        }

        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn context_alive(&self, id: &str) -> Result<(), DriverError> {
        if id == TOP_LEVEL_ID {
            return Ok(());
        }

        match self.frames.iter().find(|f| f.handle.id == id) {
            Some(frame) if !frame.destroyed => Ok(()),
            _ => Err(DriverError::ContextDestroyed(id.to_string())),
        }
    }

    fn element(&self, handle: &ElementHandle) -> Result<&ScriptedElement, DriverError> {
        self.context_alive(&handle.context)?;
        self.elements
            .get(&handle.id)
            .map(|(_, el)| el)
            .ok_or_else(|| DriverError::Other(format!("unknown element {}", handle.id)))
    }

    fn top_level(&self) -> ContextHandle {
        ContextHandle {
            id: TOP_LEVEL_ID.to_string(),
            url: self.url.clone(),
            top_level: true,
        }
    }
}

pub struct ScriptedDriver {
    state: Mutex<State>,
}

impl ScriptedDriver {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(State {
                url: url.into(),
                closed: false,
                frame_lists: 0,
                frames: Vec::new(),
                next_frame: 1,
                next_element: 1,
                elements: HashMap::new(),
                by_selector: HashMap::new(),
                ancestors: HashMap::new(),
                failures: HashMap::new(),
                calls: HashMap::new(),
                console: Vec::new(),
                evaluations: Vec::new(),
                evaluate_result: json!({ "installed": true }),
                navigations: Vec::new(),
            }),
        }
    }

    pub fn top_level_handle(&self) -> ContextHandle {
        self.state.lock().top_level()
    }

    pub fn add_frame(&self, url: &str) -> ContextHandle {
        self.add_frame_after(url, 0)
    }

    /// Frame that shows up in `list_frames` only once that call has already
    /// been made `lists` times.
    pub fn add_frame_after(&self, url: &str, lists: u32) -> ContextHandle {
        let mut state = self.state.lock();
        let handle = ContextHandle {
            id: format!("frame-{}", state.next_frame),
            url: url.to_string(),
            top_level: false,
        };
        state.next_frame += 1;
        let listed_after = state.frame_lists + lists;
        state.frames.push(Frame {
            handle: handle.clone(),
            listed_after,
            destroyed: false,
        });
        handle
    }

    /// Detaches the frame: it disappears from listings and every call
    /// addressing it or its elements fails with `ContextDestroyed`.
    pub fn destroy_frame(&self, context: &ContextHandle) {
        let mut state = self.state.lock();
        if let Some(frame) = state.frames.iter_mut().find(|f| f.handle.id == context.id) {
            frame.destroyed = true;
        }
    }

    pub fn put(
        &self,
        context: &ContextHandle,
        selector: &str,
        element: ScriptedElement,
    ) -> ElementHandle {
        let mut state = self.state.lock();
        let id = state.next_element;
        state.next_element += 1;
        state.elements.insert(id, (context.id.clone(), element));
        state
            .by_selector
            .entry((context.id.clone(), selector.to_string()))
            .or_default()
            .push(id);

        ElementHandle {
            id,
            context: context.id.clone(),
        }
    }

    pub fn put_text(&self, context: &ContextHandle, selector: &str, text: &str) -> ElementHandle {
        self.put(context, selector, ScriptedElement::visible(text))
    }

    pub fn set_text(&self, element: &ElementHandle, text: &str) {
        if let Some((_, el)) = self.state.lock().elements.get_mut(&element.id) {
            el.text = Some(text.to_string());
        }
    }

    pub fn set_visible(&self, element: &ElementHandle, visible: bool) {
        if let Some((_, el)) = self.state.lock().elements.get_mut(&element.id) {
            el.visible = visible;
        }
    }

    /// Declares `ancestor` as the nearest match of `selector` above `element`.
    pub fn link_closest(&self, element: &ElementHandle, selector: &str, ancestor: &ElementHandle) {
        self.state
            .lock()
            .ancestors
            .insert((element.id, selector.to_string()), ancestor.id);
    }

    pub fn fail_next(&self, op: Operation, err: DriverError) {
        self.state
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(err);
    }

    pub fn set_evaluate_result(&self, value: Value) {
        self.state.lock().evaluate_result = value;
    }

    /// Delivers a console line to every live subscriber.
    pub fn emit_console(&self, text: &str) {
        let mut state = self.state.lock();
        state.console.retain(|sink| !sink.is_closed());
        for sink in &state.console {
            let _ = sink.try_send(ConsoleMessage::log(text));
        }
    }

    /// Kills the browser. Console subscribers observe their channel closing.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.console.clear();
    }

    pub fn evaluations(&self) -> Vec<Evaluation> {
        self.state.lock().evaluations.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().navigations.clone()
    }

    pub fn calls(&self, op: Operation) -> u64 {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn console_subscribers(&self) -> usize {
        let mut state = self.state.lock();
        state.console.retain(|sink| !sink.is_closed());
        state.console.len()
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        state.enter(Operation::Goto)?;
        state.url = url.to_string();
        state.navigations.push(url.to_string());
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        let mut state = self.state.lock();
        state.enter(Operation::CurrentUrl)?;
        Ok(state.url.clone())
    }

    async fn top_level(&self) -> Result<ContextHandle, DriverError> {
        let mut state = self.state.lock();
        state.enter(Operation::TopLevel)?;
        Ok(state.top_level())
    }

    async fn list_frames(&self) -> Result<Vec<ContextHandle>, DriverError> {
        let mut state = self.state.lock();
        state.enter(Operation::ListFrames)?;

        let seen = state.frame_lists;
        state.frame_lists += 1;

        Ok(state
            .frames
            .iter()
            .filter(|f| !f.destroyed && f.listed_after <= seen)
            .map(|f| f.handle.clone())
            .collect())
    }

    async fn locate(
        &self,
        context: &ContextHandle,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, DriverError> {
        let mut state = self.state.lock();
        state.enter(Operation::Locate)?;
        state.context_alive(&context.id)?;

        let ids = state
            .by_selector
            .get(&(context.id.clone(), selector.to_string()))
            .cloned()
            .unwrap_or_default();

        Ok(ids
            .into_iter()
            .map(|id| ElementHandle {
                id,
                context: context.id.clone(),
            })
            .collect())
    }

    async fn is_visible(
        &self,
        element: &ElementHandle,
        timeout: Duration,
    ) -> Result<bool, DriverError> {
        let (visible, delay) = {
            let mut state = self.state.lock();
            state.enter(Operation::IsVisible)?;
            let el = state.element(element)?;
            (el.visible, el.appears_after)
        };

        match delay {
            Some(delay) if visible => {
                tokio::time::sleep(delay.min(timeout)).await;
                Ok(delay <= timeout)
            }
            _ => Ok(visible),
        }
    }

    async fn text_content(&self, element: &ElementHandle) -> Result<Option<String>, DriverError> {
        let mut state = self.state.lock();
        state.enter(Operation::TextContent)?;
        Ok(state.element(element)?.text.clone())
    }

    async fn get_attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        let mut state = self.state.lock();
        state.enter(Operation::GetAttribute)?;
        Ok(state.element(element)?.attributes.get(name).cloned())
    }

    async fn closest(
        &self,
        element: &ElementHandle,
        selector: &str,
    ) -> Result<Option<ElementHandle>, DriverError> {
        let mut state = self.state.lock();
        state.enter(Operation::Closest)?;
        state.element(element)?;

        Ok(state
            .ancestors
            .get(&(element.id, selector.to_string()))
            .map(|id| ElementHandle {
                id: *id,
                context: element.context.clone(),
            }))
    }

    async fn evaluate(&self, context: &ContextHandle, script: &str) -> Result<Value, DriverError> {
        let mut state = self.state.lock();
        state.enter(Operation::Evaluate)?;
        state.context_alive(&context.id)?;
        state.evaluations.push(Evaluation {
            context: context.id.clone(),
            script: script.to_string(),
        });
        Ok(state.evaluate_result.clone())
    }

    async fn subscribe_console(&self, sink: Sender<ConsoleMessage>) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        state.enter(Operation::SubscribeConsole)?;
        state.console.push(sink);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn late_frame_appears_after_listings() {
        let driver = ScriptedDriver::new("https://www.copart.com/auctionDashboard");
        driver.add_frame_after("https://g2auction.copart.com/g2/", 2);

        assert!(driver.list_frames().await.unwrap().is_empty());
        assert!(driver.list_frames().await.unwrap().is_empty());
        assert_eq!(driver.list_frames().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn destroyed_frame_fails_element_calls() {
        let driver = ScriptedDriver::new("https://www.copart.com");
        let frame = driver.add_frame("https://g2auction.copart.com/g2/");
        let el = driver.put_text(&frame, ".current-bid", "$100");

        driver.destroy_frame(&frame);

        let err = driver.text_content(&el).await.unwrap_err();
        assert!(err.is_context_lost());
        assert!(driver.list_frames().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let driver = ScriptedDriver::new("https://www.iaai.com");
        driver.fail_next(Operation::ListFrames, DriverError::Other("flaky".into()));

        assert!(driver.list_frames().await.is_err());
        assert!(driver.list_frames().await.is_ok());
        assert_eq!(driver.calls(Operation::ListFrames), 2);
    }

    #[tokio::test]
    async fn console_lines_reach_subscribers_until_close() {
        let driver = ScriptedDriver::new("https://www.iaai.com");
        let (tx, mut rx) = mpsc::channel(4);
        driver.subscribe_console(tx).await.unwrap();

        driver.emit_console("hello");
        assert_eq!(rx.recv().await.unwrap().text, "hello");

        driver.close();
        assert!(rx.recv().await.is_none());
        assert_eq!(driver.top_level().await.unwrap_err(), DriverError::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_element_misses_short_wait() {
        let driver = ScriptedDriver::new("https://www.iaai.com");
        let main = driver.top_level_handle();
        let el = driver.put(
            &main,
            ".bid",
            ScriptedElement::visible("$1").appearing_after(Duration::from_secs(2)),
        );

        assert!(!driver.is_visible(&el, Duration::from_secs(1)).await.unwrap());
        assert!(driver.is_visible(&el, Duration::from_secs(3)).await.unwrap());
    }
}

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use egui::{Pos2, pos2, vec2};
use serde_json::Value;
use skill_canvas::SkillEditor;
use skill_canvas::canvas::geometry::GeometryEngine;
use skill_canvas::canvas::host::{NodeChoice, NodePrompt, TickLayoutHost};
use skill_canvas::canvas::insertion::{
    EdgeContext, EdgeKey, InsertAbort, InsertOutcome, InsertRequest, InsertionPipeline,
    InsertionSettings,
};
use skill_canvas::canvas::viewport::Viewport;
use skill_canvas::canvas::{SharedDocument, shared};
use skill_canvas::graph_utils::error::GraphError;
use skill_canvas::graph_utils::graph::{GraphDocument, LineId, NodeId};
use skill_canvas::graph_utils::registry::kinds;
use skill_canvas::persistence::settings::EditorSettings;
use tokio::time::Instant;

/// Answers prompts from a script, taking `think` to do so.
struct ScriptedPrompt {
    answers: RefCell<VecDeque<Option<NodeChoice>>>,
    think: Duration,
    calls: Cell<usize>,
    seen_containers: RefCell<Vec<Option<NodeId>>>,
}

impl ScriptedPrompt {
    fn new(answers: &[Option<&str>]) -> Rc<Self> {
        Rc::new(Self {
            answers: RefCell::new(answers.iter().map(|a| a.map(NodeChoice::new)).collect()),
            think: ms(50),
            calls: Cell::new(0),
            seen_containers: RefCell::new(Vec::new()),
        })
    }
}

#[async_trait(?Send)]
impl NodePrompt for ScriptedPrompt {
    async fn prompt_for_node_type(
        &self,
        _position: Pos2,
        container: Option<NodeId>,
    ) -> Option<NodeChoice> {
        self.calls.set(self.calls.get() + 1);
        self.seen_containers.borrow_mut().push(container);
        tokio::time::sleep(self.think).await;
        self.answers.borrow_mut().pop_front().flatten()
    }
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn tick_host() -> TickLayoutHost {
    TickLayoutHost::new(ms(20), ms(50))
}

fn pipeline(doc: &SharedDocument, prompt: &Rc<ScriptedPrompt>) -> InsertionPipeline {
    InsertionPipeline::new(
        Rc::clone(doc),
        prompt.clone(),
        Rc::new(tick_host()),
        InsertionSettings::default(),
    )
}

fn add(doc: &SharedDocument, kind: &str, x: f32, y: f32) -> NodeId {
    doc.borrow_mut()
        .create_node(kind.into(), pos2(x, y), Value::Null, None)
        .expect("node should be created")
}

fn add_in(doc: &SharedDocument, kind: &str, x: f32, y: f32, parent: NodeId) -> NodeId {
    doc.borrow_mut()
        .create_node(kind.into(), pos2(x, y), Value::Null, Some(parent))
        .expect("child node should be created")
}

fn link(doc: &SharedDocument, a: NodeId, b: NodeId) -> LineId {
    let mut doc = doc.borrow_mut();
    let from = doc.output_port(a).unwrap();
    let to = doc.input_port(b).unwrap();
    doc.connect(from, to).unwrap()
}

fn position(doc: &SharedDocument, id: NodeId) -> Pos2 {
    doc.borrow().get_node(id).unwrap().position
}

fn has_line(doc: &GraphDocument, from: NodeId, to: NodeId) -> bool {
    let (Some(f), Some(t)) = (doc.output_port(from), doc.input_port(to)) else {
        return false;
    };
    doc.lines.values().any(|l| l.from_port == Some(f) && l.to_port == Some(t))
}

fn inserted(outcome: InsertOutcome) -> (NodeId, Vec<LineId>, Option<LineId>) {
    match outcome {
        InsertOutcome::Inserted { node, lines, replaced } => (node, lines, replaced),
        other => panic!("expected an insertion, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn port_click_inserts_node_to_the_right_and_wires_it() {
    init_logs();
    let doc = shared(GraphDocument::new());
    let a = add(&doc, kinds::LLM, 0.0, 0.0);
    let prompt = ScriptedPrompt::new(&[Some(kinds::CODE)]);
    let pipeline = pipeline(&doc, &prompt);

    let port = doc.borrow().output_port(a).unwrap();
    let (node, lines, replaced) = inserted(pipeline.on_port_click(port).await);

    let doc = doc.borrow();
    assert_eq!(doc.node_count(), 2);
    assert_eq!(lines.len(), 1);
    assert_eq!(replaced, None);
    assert!(has_line(&doc, a, node));
    // output anchor (280, 60), gap 80, vertically centered on the anchor
    assert_eq!(doc.get_node(node).unwrap().position, pos2(360.0, 0.0));
    assert!(!pipeline.locks().is_held(EdgeKey::Port(port)));
}

#[tokio::test(start_paused = true)]
async fn port_click_nudges_past_a_blocking_sibling() {
    let doc = shared(GraphDocument::new());
    let a = add(&doc, kinds::LLM, 0.0, 0.0);
    let blocker = add(&doc, kinds::CODE, 360.0, 0.0);
    let prompt = ScriptedPrompt::new(&[Some(kinds::CODE)]);
    let pipeline = pipeline(&doc, &prompt);

    let port = doc.borrow().output_port(a).unwrap();
    let (node, _, _) = inserted(pipeline.on_port_click(port).await);
    let doc = doc.borrow();
    let placed = doc.node_bounds(node).unwrap();
    assert!(!placed.intersects(doc.node_bounds(blocker).unwrap()));
    assert_eq!(placed.min, pos2(360.0, 150.0), "moved straight down in fixed steps");
}

#[tokio::test(start_paused = true)]
async fn port_click_on_a_loop_output_stays_beside_the_loop() {
    let doc = shared(GraphDocument::new());
    let lp = add(&doc, kinds::LOOP, 0.0, 0.0);
    let prompt = ScriptedPrompt::new(&[Some(kinds::CODE)]);
    let pipeline = pipeline(&doc, &prompt);

    let port = doc.borrow().output_port(lp).unwrap();
    let (node, _, _) = inserted(pipeline.on_port_click(port).await);
    assert_eq!(*prompt.seen_containers.borrow(), vec![None]);
    let doc = doc.borrow();
    let created = doc.get_node(node).unwrap();
    assert_eq!(created.parent, None);
    assert!(has_line(&doc, lp, node));
    // loop output anchor sits at (500, 150)
    assert_eq!(created.position, pos2(580.0, 90.0));
}

#[tokio::test(start_paused = true)]
async fn port_click_inside_a_loop_keeps_the_source_container() {
    let doc = shared(GraphDocument::new());
    let lp = add(&doc, kinds::LOOP, 0.0, 0.0);
    let body = add_in(&doc, kinds::LLM, 20.0, 0.0, lp);
    let prompt = ScriptedPrompt::new(&[Some(kinds::CODE)]);
    let pipeline = pipeline(&doc, &prompt);

    let port = doc.borrow().output_port(body).unwrap();
    let (node, _, _) = inserted(pipeline.on_port_click(port).await);
    assert_eq!(*prompt.seen_containers.borrow(), vec![Some(lp)]);
    let doc = doc.borrow();
    assert_eq!(doc.get_node(node).unwrap().parent, Some(lp));
    assert!(has_line(&doc, body, node));
    assert_eq!(doc.absolute_position(node), Some(pos2(440.0, 120.0)));
}

#[tokio::test(start_paused = true)]
async fn drag_released_on_a_port_is_a_noop() {
    let doc = shared(GraphDocument::new());
    let a = add(&doc, kinds::LLM, 0.0, 0.0);
    let b = add(&doc, kinds::CODE, 600.0, 0.0);
    let line = {
        let mut d = doc.borrow_mut();
        let from = d.output_port(a).unwrap();
        let line = d.begin_drag(from).unwrap();
        let target = d.input_port(b).unwrap();
        d.resolve_drag(line, target).unwrap();
        line
    };
    let before = doc.borrow().snapshot();
    let prompt = ScriptedPrompt::new(&[Some(kinds::CODE)]);
    let pipeline = pipeline(&doc, &prompt);

    assert_eq!(pipeline.on_drag_line_end(line, pos2(900.0, 400.0)).await, InsertOutcome::NoOp);
    assert_eq!(prompt.calls.get(), 0, "no prompt for a wired drag");
    assert_eq!(doc.borrow().snapshot(), before);
}

#[tokio::test(start_paused = true)]
async fn drag_released_over_canvas_replaces_the_provisional_line() {
    let doc = shared(GraphDocument::new());
    let a = add(&doc, kinds::LLM, 0.0, 0.0);
    let provisional = {
        let mut d = doc.borrow_mut();
        let from = d.output_port(a).unwrap();
        d.begin_drag(from).unwrap()
    };
    let prompt = ScriptedPrompt::new(&[Some(kinds::HTTP_API)]);
    let pipeline = pipeline(&doc, &prompt);

    let outcome = pipeline.on_drag_line_end(provisional, pos2(600.0, 300.0)).await;
    let (node, lines, replaced) = inserted(outcome);
    let doc = doc.borrow();
    assert_eq!(replaced, Some(provisional));
    assert!(doc.get_line(provisional).is_none());
    assert_eq!(lines.len(), 1);
    assert_eq!(doc.line_count(), 1);
    assert!(has_line(&doc, a, node));
    assert_eq!(doc.get_node(node).unwrap().position, pos2(600.0, 240.0));
}

#[tokio::test(start_paused = true)]
async fn midpoint_insertion_splits_the_line() {
    let doc = shared(GraphDocument::new());
    let a = add(&doc, kinds::LLM, 0.0, 0.0);
    let b = add(&doc, kinds::CODE, 800.0, 0.0);
    let line = link(&doc, a, b);
    let nodes_before = doc.borrow().node_count();
    let prompt = ScriptedPrompt::new(&[Some(kinds::CONDITION)]);
    let pipeline = pipeline(&doc, &prompt);

    let (node, lines, replaced) = inserted(pipeline.on_line_add_button(line).await);
    let doc = doc.borrow();
    assert_eq!(replaced, Some(line));
    assert!(doc.get_line(line).is_none(), "the split line is gone");
    assert_eq!(lines.len(), 2);
    assert!(has_line(&doc, a, node));
    assert!(has_line(&doc, node, b));
    assert!(!has_line(&doc, a, b));
    assert_eq!(doc.node_count(), nodes_before + 1);
    assert!(doc.reaches(a, b), "source still flows into target through the new node");
    // b moves to x = 1100, the node is centered between (280, 60) and (1100, 60)
    assert_eq!(doc.get_node(b).unwrap().position, pos2(1100.0, 0.0));
    assert_eq!(doc.get_node(node).unwrap().position, pos2(550.0, 0.0));
}

#[tokio::test(start_paused = true)]
async fn midpoint_insertion_offsets_downstream_nodes() {
    let doc = shared(GraphDocument::new());
    let a = add(&doc, kinds::LLM, 0.0, 0.0);
    let b = add(&doc, kinds::CODE, 400.0, 0.0);
    let c = add(&doc, kinds::CODE, 800.0, 0.0);
    let unrelated = add(&doc, kinds::CODE, 400.0, 400.0);
    let line = link(&doc, a, b);
    link(&doc, b, c);
    let prompt = ScriptedPrompt::new(&[Some(kinds::CODE)]);
    let pipeline = pipeline(&doc, &prompt);

    let (node, _, _) = inserted(pipeline.on_line_add_button(line).await);
    assert_eq!(position(&doc, a), pos2(0.0, 0.0));
    assert_eq!(position(&doc, b), pos2(700.0, 0.0));
    assert_eq!(position(&doc, c), pos2(1100.0, 0.0));
    assert_eq!(position(&doc, unrelated), pos2(400.0, 400.0));

    let doc = doc.borrow();
    let placed = doc.node_bounds(node).unwrap();
    assert_eq!(placed.center(), pos2(490.0, 60.0), "the new node sits on the line");
    assert!(!placed.intersects(doc.node_bounds(a).unwrap()));
    assert!(!placed.intersects(doc.node_bounds(b).unwrap()));
}

#[tokio::test(start_paused = true)]
async fn split_line_into_block_end_keeps_the_anchor() {
    let doc = shared(GraphDocument::new());
    let lp = add(&doc, kinds::LOOP, 0.0, 0.0);
    let body = add_in(&doc, kinds::LLM, 20.0, 0.0, lp);
    let block_end = doc.borrow().get_node(lp).unwrap().blocks[1];
    let line = link(&doc, body, block_end);
    let prompt = ScriptedPrompt::new(&[Some(kinds::CODE)]);
    let pipeline = pipeline(&doc, &prompt);

    let (node, _, _) = inserted(pipeline.on_line_add_button(line).await);
    assert_eq!(position(&doc, block_end), pos2(380.0, 60.0));
    let doc = doc.borrow();
    assert_eq!(doc.get_node(node).unwrap().parent, Some(lp));
    assert!(has_line(&doc, node, block_end));
    // between (360, 180) and (440, 180) in root coordinates
    assert_eq!(doc.node_bounds(node).unwrap().center(), pos2(400.0, 180.0));
}

#[tokio::test(start_paused = true)]
async fn context_menu_places_an_unwired_node() {
    let doc = shared(GraphDocument::new());
    let prompt = ScriptedPrompt::new(&[Some(kinds::COMMENT)]);
    let pipeline = pipeline(&doc, &prompt);

    let mut viewport = Viewport::default();
    viewport.zoom_by(2.0);
    let request = InsertRequest::from_screen(EdgeContext::None, pos2(200.0, 200.0), &viewport);
    let (node, lines, replaced) = inserted(pipeline.insert_node_on_edge(request).await);
    let doc = doc.borrow();
    assert!(lines.is_empty());
    assert_eq!(replaced, None);
    assert_eq!(doc.line_count(), 0);
    assert_eq!(doc.get_node(node).unwrap().position, pos2(100.0, 100.0));
}

#[tokio::test(start_paused = true)]
async fn context_menu_inside_a_loop_parents_the_node() {
    let doc = shared(GraphDocument::new());
    let lp = add(&doc, kinds::LOOP, 0.0, 0.0);
    let prompt = ScriptedPrompt::new(&[Some(kinds::BREAK)]);
    let pipeline = pipeline(&doc, &prompt);

    let (node, _, _) = inserted(pipeline.on_canvas_context_menu(pos2(200.0, 200.0)).await);
    assert_eq!(*prompt.seen_containers.borrow(), vec![Some(lp)]);
    let doc = doc.borrow();
    let created = doc.get_node(node).unwrap();
    assert_eq!(created.parent, Some(lp));
    // loop canvas starts at (60, 120)
    assert_eq!(created.position, pos2(140.0, 80.0));
    assert_eq!(doc.absolute_position(node), Some(pos2(200.0, 200.0)));
}

#[tokio::test(start_paused = true)]
async fn dismissed_prompt_changes_nothing() {
    let doc = shared(GraphDocument::new());
    let a = add(&doc, kinds::LLM, 0.0, 0.0);
    let b = add(&doc, kinds::CODE, 800.0, 0.0);
    let line = link(&doc, a, b);
    let port = doc.borrow().output_port(a).unwrap();
    let before = doc.borrow().snapshot();
    let prompt = ScriptedPrompt::new(&[None, None, None]);
    let pipeline = pipeline(&doc, &prompt);

    assert_eq!(pipeline.on_port_click(port).await, InsertOutcome::Canceled);
    assert_eq!(pipeline.on_line_add_button(line).await, InsertOutcome::Canceled);
    let menu = pipeline.on_canvas_context_menu(pos2(0.0, 400.0)).await;
    assert_eq!(menu, InsertOutcome::Canceled);
    assert_eq!(prompt.calls.get(), 3);
    assert_eq!(doc.borrow().snapshot(), before);
}

#[tokio::test(start_paused = true)]
async fn wiring_failure_rolls_back_the_new_node() {
    let doc = shared(GraphDocument::new());
    let a = add(&doc, kinds::LLM, 0.0, 0.0);
    let b = add(&doc, kinds::CODE, 800.0, 0.0);
    let line = link(&doc, a, b);
    doc.borrow_mut().drain_changes();
    let before = doc.borrow().snapshot();
    // an end node has no output to feed the old target
    let prompt = ScriptedPrompt::new(&[Some(kinds::END), Some(kinds::START)]);
    let pipeline = pipeline(&doc, &prompt);

    match pipeline.on_line_add_button(line).await {
        InsertOutcome::Aborted { reason: InsertAbort::MissingPort(kind) } => {
            assert_eq!(kind.as_str(), kinds::END)
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(doc.borrow().snapshot(), before, "counters are restored too");
    assert!(doc.borrow_mut().drain_changes().is_empty(), "the renderer never sees the node");
    assert!(doc.borrow().get_line(line).is_some());
    assert_eq!(position(&doc, b), pos2(800.0, 0.0), "nothing shifts on failure");

    // a start node has no input to receive the source
    let port = doc.borrow().output_port(a).unwrap();
    assert!(matches!(
        pipeline.on_port_click(port).await,
        InsertOutcome::Aborted { reason: InsertAbort::MissingPort(_) }
    ));
    assert_eq!(doc.borrow().snapshot(), before);
}

#[tokio::test(start_paused = true)]
async fn rollback_after_a_drain_reports_the_removal() {
    let doc = shared(GraphDocument::new());
    let a = add(&doc, kinds::LLM, 0.0, 0.0);
    doc.borrow_mut().drain_changes();
    let prompt = ScriptedPrompt::new(&[Some(kinds::START)]);
    let pipeline = pipeline(&doc, &prompt);
    let port = doc.borrow().output_port(a).unwrap();

    // the renderer drains while the node waits for its first layout
    let (outcome, seen) = tokio::join!(pipeline.on_port_click(port), async {
        tokio::time::sleep(ms(60)).await;
        doc.borrow_mut().drain_changes()
    });
    assert!(matches!(outcome, InsertOutcome::Aborted { .. }));
    assert_eq!(seen.len(), 1, "creation was observed");
    let removal = doc.borrow_mut().drain_changes();
    assert_eq!(removal.len(), 1);
    assert_eq!(removal[0].subject(), seen[0].subject());
}

#[tokio::test(start_paused = true)]
async fn invalid_parent_aborts_before_allocation() {
    let doc = shared(GraphDocument::new());
    let lp = add(&doc, kinds::LOOP, 0.0, 0.0);
    let before = doc.borrow().snapshot();
    let prompt = ScriptedPrompt::new(&[Some(kinds::START)]);
    let pipeline = pipeline(&doc, &prompt);

    let request = InsertRequest::new(EdgeContext::None, pos2(2000.0, 2000.0)).with_container(lp);
    match pipeline.insert_node_on_edge(request).await {
        InsertOutcome::Aborted {
            reason: InsertAbort::Graph(GraphError::InvalidParent { parent, .. }),
        } => assert_eq!(parent, lp),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(doc.borrow().snapshot(), before);
}

#[tokio::test(start_paused = true)]
async fn edge_removed_while_prompt_is_open_aborts() {
    let doc = shared(GraphDocument::new());
    let a = add(&doc, kinds::LLM, 0.0, 0.0);
    let b = add(&doc, kinds::CODE, 800.0, 0.0);
    let line = link(&doc, a, b);
    let prompt = ScriptedPrompt::new(&[Some(kinds::CODE)]);
    let pipeline = pipeline(&doc, &prompt);

    let (outcome, _) = tokio::join!(pipeline.on_line_add_button(line), async {
        tokio::time::sleep(ms(10)).await;
        doc.borrow_mut().remove_node(b);
    });
    assert_eq!(
        outcome,
        InsertOutcome::Aborted { reason: InsertAbort::Graph(GraphError::UnknownLine(line)) }
    );
    let doc = doc.borrow();
    assert_eq!(doc.node_count(), 1);
    assert_eq!(doc.line_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_insertions_on_one_edge_are_serialized() {
    let doc = shared(GraphDocument::new());
    let a = add(&doc, kinds::LLM, 0.0, 0.0);
    let port = doc.borrow().output_port(a).unwrap();
    let prompt = ScriptedPrompt::new(&[Some(kinds::CODE), Some(kinds::CODE)]);
    let pipeline = pipeline(&doc, &prompt);

    let (first, second) = tokio::join!(pipeline.on_port_click(port), pipeline.on_port_click(port));
    assert!(matches!(first, InsertOutcome::Inserted { .. }));
    let busy = InsertOutcome::Aborted { reason: InsertAbort::EdgeBusy(EdgeKey::Port(port)) };
    assert_eq!(second, busy);
    assert_eq!(prompt.calls.get(), 1);
    assert!(!pipeline.locks().is_held(EdgeKey::Port(port)));

    // the lock is released afterwards
    assert!(matches!(pipeline.on_port_click(port).await, InsertOutcome::Inserted { .. }));
}

#[tokio::test(start_paused = true)]
async fn insertions_on_different_edges_interleave() {
    let doc = shared(GraphDocument::new());
    let a = add(&doc, kinds::LLM, 0.0, 0.0);
    let b = add(&doc, kinds::LLM, 0.0, 1000.0);
    let (pa, pb) = {
        let d = doc.borrow();
        (d.output_port(a).unwrap(), d.output_port(b).unwrap())
    };
    let prompt = ScriptedPrompt::new(&[Some(kinds::CODE), Some(kinds::CODE)]);
    let pipeline = pipeline(&doc, &prompt);

    let (first, second) = tokio::join!(pipeline.on_port_click(pa), pipeline.on_port_click(pb));
    let (na, _, _) = inserted(first);
    let (nb, _, _) = inserted(second);
    let doc = doc.borrow();
    assert!(has_line(&doc, a, na));
    assert!(has_line(&doc, b, nb));
    assert_eq!(doc.committed_line_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn tick_host_waits_per_suspension_point() {
    let settings = EditorSettings {
        wiring_tick_ms: 15,
        anchor_pass_delay_ms: 120,
        ..EditorSettings::default()
    };
    let prompt = ScriptedPrompt::new(&[Some(kinds::CODE)]);
    let (editor, _host) = SkillEditor::with_tick_host(settings, prompt);
    let a = add(editor.document(), kinds::LLM, 0.0, 0.0);
    let lp = add(editor.document(), kinds::LOOP, 0.0, 600.0);
    let port = editor.document().borrow().output_port(a).unwrap();

    let started = Instant::now();
    inserted(editor.pipeline().on_port_click(port).await);
    let elapsed = started.elapsed();
    assert!(elapsed >= ms(65) && elapsed < ms(70), "prompt plus wiring tick, got {:?}", elapsed);

    let started = Instant::now();
    editor.set_container_expanded(lp, false).await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= ms(120) && elapsed < ms(125), "anchor-pass delay, got {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn editor_collapse_then_expand_restores_loop_geometry() {
    init_logs();
    let prompt = ScriptedPrompt::new(&[]);
    let (editor, host) = SkillEditor::with_tick_host(EditorSettings::default(), prompt);
    let lp = add(editor.document(), kinds::LOOP, 100.0, 100.0);
    let blocks_before = {
        let d = editor.document().borrow();
        let blocks = &d.get_node(lp).unwrap().blocks;
        (d.get_node(blocks[0]).unwrap().position, d.get_node(blocks[1]).unwrap().position)
    };

    host.set_rendered_height(lp, 220.0);
    editor.set_container_expanded(lp, false).await.unwrap();
    {
        let d = editor.document().borrow();
        let node = d.get_node(lp).unwrap();
        assert!(node.collapsed);
        assert_eq!(node.size, vec2(400.0, 220.0));
        let start = d.get_node(node.blocks[0]).unwrap().position;
        let end = d.get_node(node.blocks[1]).unwrap().position;
        assert_eq!(start, pos2(0.0, -10.0));
        assert_eq!(end, pos2(280.0, -10.0));
    }

    editor.set_container_expanded(lp, true).await.unwrap();
    let d = editor.document().borrow();
    let node = d.get_node(lp).unwrap();
    assert!(!node.collapsed);
    assert_eq!(node.size, vec2(500.0, 300.0));
    assert_eq!(node.position, pos2(100.0, 100.0));
    let blocks_after = (
        d.get_node(node.blocks[0]).unwrap().position,
        d.get_node(node.blocks[1]).unwrap().position,
    );
    assert_eq!(blocks_after, blocks_before);
}

#[tokio::test(start_paused = true)]
async fn nested_containers_toggle_together() {
    let host = tick_host();
    let engine = GeometryEngine::default();
    let doc = shared(GraphDocument::new());
    let group = add(&doc, kinds::GROUP, 0.0, 0.0);
    let lp = add_in(&doc, kinds::LOOP, 0.0, 0.0, group);
    host.set_rendered_height(group, 90.0);
    host.set_rendered_height(lp, 140.0);

    engine.toggle_many(&doc, &host, &[(group, false), (lp, false)]).await.unwrap();
    {
        let d = doc.borrow();
        assert!(d.get_node(group).unwrap().collapsed);
        let inner = d.get_node(lp).unwrap();
        assert!(inner.collapsed);
        assert_eq!(inner.size, vec2(400.0, 140.0));
        assert!(d.is_hidden(lp));
        assert_eq!(d.get_node(inner.blocks[0]).unwrap().position, pos2(0.0, -50.0));
    }

    let missing = uuid::Uuid::now_v7();
    let before = doc.borrow().snapshot();
    assert_eq!(
        engine.toggle_many(&doc, &host, &[(group, true), (missing, true)]).await,
        Err(GraphError::UnknownNode(missing))
    );
    assert_eq!(doc.borrow().snapshot(), before, "a bad id fails the batch before any change");
}

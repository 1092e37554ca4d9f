use std::{borrow::Cow, fmt};

use log::{error, info};
use parking_lot::Mutex;

use crate::BatchError;

use super::{
    parameters::JobParameters,
    step::{Step, StepExecution},
    task_executor::TaskExecutor,
};

/// Token returned by a [`Decider`] to select the next branch of a flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowStatus(Cow<'static, str>);

impl FlowStatus {
    pub const CONTINUE: FlowStatus = FlowStatus(Cow::Borrowed("CONTINUE"));
    pub const COMPLETED: FlowStatus = FlowStatus(Cow::Borrowed("COMPLETED"));
    pub const FAILED: FlowStatus = FlowStatus(Cow::Borrowed("FAILED"));

    pub fn new(status: impl Into<String>) -> Self {
        FlowStatus(Cow::Owned(status.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chooses a branch of a flow from the job parameters.
pub trait Decider: Send + Sync {
    /// Must be a pure function of `parameters` returning one of
    /// [`Decider::outcomes`].
    fn decide(&self, parameters: &JobParameters) -> FlowStatus;

    /// Every status `decide` can return. A job only builds if each of them
    /// has a transition.
    fn outcomes(&self) -> Vec<FlowStatus>;
}

/// Continues when a job parameter has a value, completes otherwise.
///
/// ```
/// use chunk_batch::core::flow::{Decider, FlowStatus, JobParametersDecider};
/// use chunk_batch::core::parameters::JobParameters;
///
/// let decider = JobParametersDecider::new("date");
///
/// let blank = JobParameters::builder().add("date", "").build();
/// let dated = JobParameters::builder().add("date", "2024-03").build();
///
/// assert_eq!(decider.decide(&blank), FlowStatus::COMPLETED);
/// assert_eq!(decider.decide(&dated), FlowStatus::CONTINUE);
/// ```
pub struct JobParametersDecider {
    key: String,
}

impl JobParametersDecider {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
        }
    }
}

impl Decider for JobParametersDecider {
    fn decide(&self, parameters: &JobParameters) -> FlowStatus {
        match parameters.get_non_empty(&self.key) {
            Some(_) => FlowStatus::CONTINUE,
            None => FlowStatus::COMPLETED,
        }
    }

    fn outcomes(&self) -> Vec<FlowStatus> {
        vec![FlowStatus::CONTINUE, FlowStatus::COMPLETED]
    }
}

/// How a flow, or a part of it, ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Every element ran; the enclosing flow carries on.
    Completed,
    /// A decision ended the job early, successfully.
    Ended,
    Failed,
}

/// State shared by every flow of one job run.
pub(crate) struct FlowContext<'r> {
    parameters: &'r JobParameters,
    executions: Mutex<Vec<StepExecution>>,
}

impl<'r> FlowContext<'r> {
    pub(crate) fn new(parameters: &'r JobParameters) -> Self {
        Self {
            parameters,
            executions: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn into_executions(self) -> Vec<StepExecution> {
        self.executions.into_inner()
    }

    fn execute_step(&self, step: &dyn Step) -> Outcome {
        let mut execution =
            StepExecution::new(step.name()).with_parameters(self.parameters.clone());
        let result = step.execute(&mut execution);
        self.executions.lock().push(execution);

        match result {
            Ok(()) => Outcome::Completed,
            Err(_) => Outcome::Failed,
        }
    }
}

enum FlowElement<'a> {
    Step(&'a dyn Step),
    Flow(Flow<'a>),
    Decision(Decision<'a>),
    Split(Split<'a>),
}

/// An ordered sequence of steps, nested flows, decisions and splits.
///
/// Execution stops at the first failed step.
pub struct Flow<'a> {
    name: String,
    elements: Vec<FlowElement<'a>>,
}

impl<'a> Flow<'a> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn run(&self, context: &FlowContext<'_>) -> Outcome {
        for element in &self.elements {
            let outcome = match element {
                FlowElement::Step(step) => context.execute_step(*step),
                FlowElement::Flow(flow) => flow.run(context),
                FlowElement::Decision(decision) => decision.run(context),
                FlowElement::Split(split) => split.run(context),
            };
            if outcome != Outcome::Completed {
                return outcome;
            }
        }
        Outcome::Completed
    }

    pub(crate) fn validate(&self) -> Result<(), BatchError> {
        if self.elements.is_empty() {
            return Err(BatchError::Configuration(format!(
                "flow {} has no steps",
                self.name
            )));
        }
        for element in &self.elements {
            match element {
                FlowElement::Step(_) => {}
                FlowElement::Flow(flow) => flow.validate()?,
                FlowElement::Decision(decision) => decision.validate()?,
                FlowElement::Split(split) => split.validate()?,
            }
        }
        Ok(())
    }
}

pub struct FlowBuilder<'a> {
    name: String,
    elements: Vec<FlowElement<'a>>,
}

impl<'a> FlowBuilder<'a> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            elements: Vec::new(),
        }
    }

    pub fn start(self, step: &'a dyn Step) -> Self {
        self.next(step)
    }

    pub fn next(mut self, step: &'a dyn Step) -> Self {
        self.elements.push(FlowElement::Step(step));
        self
    }

    pub fn next_flow(mut self, flow: Flow<'a>) -> Self {
        self.elements.push(FlowElement::Flow(flow));
        self
    }

    pub fn decision(mut self, decision: Decision<'a>) -> Self {
        self.elements.push(FlowElement::Decision(decision));
        self
    }

    pub fn split(mut self, split: Split<'a>) -> Self {
        self.elements.push(FlowElement::Split(split));
        self
    }

    pub fn build(self) -> Flow<'a> {
        Flow {
            name: self.name,
            elements: self.elements,
        }
    }
}

enum Transition<'a> {
    To(Flow<'a>),
    End,
}

/// A conditional branch: the decider's status selects a flow to run, or ends
/// the job.
///
/// After the selected flow completes, execution carries on with the element
/// that follows the decision.
pub struct Decision<'a> {
    decider: &'a dyn Decider,
    transitions: Vec<(FlowStatus, Transition<'a>)>,
}

impl<'a> Decision<'a> {
    pub fn new(decider: &'a dyn Decider) -> Self {
        Self {
            decider,
            transitions: Vec::new(),
        }
    }

    pub fn on(mut self, status: FlowStatus, flow: Flow<'a>) -> Self {
        self.transitions.push((status, Transition::To(flow)));
        self
    }

    pub fn end_on(mut self, status: FlowStatus) -> Self {
        self.transitions.push((status, Transition::End));
        self
    }

    fn run(&self, context: &FlowContext<'_>) -> Outcome {
        let status = self.decider.decide(context.parameters);
        info!("Decision: {}", status);

        match self.transitions.iter().find(|(on, _)| *on == status) {
            Some((_, Transition::To(flow))) => flow.run(context),
            Some((_, Transition::End)) => Outcome::Ended,
            None => {
                error!("Decider returned {} which has no transition", status);
                Outcome::Failed
            }
        }
    }

    fn validate(&self) -> Result<(), BatchError> {
        let outcomes = self.decider.outcomes();

        for (status, transition) in &self.transitions {
            if !outcomes.contains(status) {
                return Err(BatchError::Configuration(format!(
                    "transition on {status} does not match any outcome of the decider"
                )));
            }
            if let Transition::To(flow) = transition {
                flow.validate()?;
            }
        }

        for outcome in &outcomes {
            if !self.transitions.iter().any(|(status, _)| status == outcome) {
                return Err(BatchError::Configuration(format!(
                    "decider outcome {outcome} has no transition"
                )));
            }
        }

        Ok(())
    }
}

/// Runs independent flows concurrently and waits for all of them.
///
/// The split fails if any of its flows failed. A decision ending one of the
/// flows only ends that flow.
pub struct Split<'a> {
    flows: Vec<Flow<'a>>,
    executor: TaskExecutor,
}

impl<'a> Split<'a> {
    pub fn new(executor: TaskExecutor) -> Self {
        Self {
            flows: Vec::new(),
            executor,
        }
    }

    pub fn add(mut self, flow: Flow<'a>) -> Self {
        self.flows.push(flow);
        self
    }

    fn run(&self, context: &FlowContext<'_>) -> Outcome {
        info!("Split: running {} flows", self.flows.len());
        let outcomes = self.executor.map_ordered(&self.flows, |flow| flow.run(context));

        if outcomes.contains(&Outcome::Failed) {
            Outcome::Failed
        } else {
            Outcome::Completed
        }
    }

    fn validate(&self) -> Result<(), BatchError> {
        if self.flows.is_empty() {
            return Err(BatchError::Configuration(
                "split has no flows".to_string(),
            ));
        }
        self.flows.iter().try_for_each(Flow::validate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::step::{RepeatStatus, StepBuilder, tasklet_fn};

    struct Fixed(FlowStatus);

    impl Decider for Fixed {
        fn decide(&self, _parameters: &JobParameters) -> FlowStatus {
            self.0.clone()
        }

        fn outcomes(&self) -> Vec<FlowStatus> {
            vec![FlowStatus::new("LEFT"), FlowStatus::new("RIGHT")]
        }
    }

    #[test]
    fn unmapped_outcome_is_rejected() {
        let decider = Fixed(FlowStatus::new("LEFT"));
        let tasklet = tasklet_fn(|_: &mut StepExecution| Ok(RepeatStatus::Finished));
        let step = StepBuilder::new("left").tasklet(&tasklet).build();

        let decision =
            Decision::new(&decider).on(FlowStatus::new("LEFT"), FlowBuilder::new("l").start(&step).build());
        let flow = FlowBuilder::new("main").decision(decision).build();

        let error = flow.validate().unwrap_err();
        assert_eq!(
            error.to_string(),
            "Configuration error: decider outcome RIGHT has no transition"
        );
    }

    #[test]
    fn transition_on_undeclared_outcome_is_rejected() {
        let decider = Fixed(FlowStatus::new("LEFT"));

        let decision = Decision::new(&decider)
            .end_on(FlowStatus::new("LEFT"))
            .end_on(FlowStatus::new("RIGHT"))
            .end_on(FlowStatus::new("UP"));
        let flow = FlowBuilder::new("main").decision(decision).build();

        assert!(flow.validate().is_err());
    }

    #[test]
    fn empty_flow_and_empty_split_are_rejected() {
        assert!(FlowBuilder::new("empty").build().validate().is_err());

        let split = Split::new(TaskExecutor::new(1).unwrap());
        let tasklet = tasklet_fn(|_: &mut StepExecution| Ok(RepeatStatus::Finished));
        let step = StepBuilder::new("only").tasklet(&tasklet).build();
        let flow = FlowBuilder::new("main").start(&step).split(split).build();
        assert!(flow.validate().is_err());
    }

    #[test]
    fn decision_runs_the_selected_branch_then_the_rest() {
        let decider = Fixed(FlowStatus::new("RIGHT"));
        let tasklet = tasklet_fn(|_: &mut StepExecution| Ok(RepeatStatus::Finished));
        let left = StepBuilder::new("left").tasklet(&tasklet).build();
        let right = StepBuilder::new("right").tasklet(&tasklet).build();
        let last = StepBuilder::new("last").tasklet(&tasklet).build();

        let flow = FlowBuilder::new("main")
            .decision(
                Decision::new(&decider)
                    .on(FlowStatus::new("LEFT"), FlowBuilder::new("l").start(&left).build())
                    .on(FlowStatus::new("RIGHT"), FlowBuilder::new("r").start(&right).build()),
            )
            .next(&last)
            .build();
        flow.validate().unwrap();

        let parameters = JobParameters::new();
        let context = FlowContext::new(&parameters);
        assert_eq!(flow.run(&context), Outcome::Completed);

        let names: Vec<String> = context
            .into_executions()
            .into_iter()
            .map(|execution| execution.name)
            .collect();
        assert_eq!(names, vec!["right", "last"]);
    }
}

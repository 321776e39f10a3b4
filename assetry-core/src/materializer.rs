//! Materializer contract.
//!
//! A materializer receives the bound arguments of one invocation and returns an
//! [Output]: nothing, a list of batches, a stream of batches, or a producer
//! task pushing batches through a [BatchSender]. Outputs are finite and are
//! consumed once; every invocation calls the materializer again.

use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;

use crate::arguments::BoundArguments;
use crate::artifact::Artifact;
use crate::error::Error;

/// A single row of asset data.
pub type Record = serde_json::Value;

const PRODUCER_CHANNEL_CAPACITY: usize = 16;

/// Unit of data yielded by a materializer.
#[derive(Debug, Clone)]
pub enum Batch {
    Records(Vec<Record>),
    /// Data of an already materialized asset, read back and included.
    Artifact(Artifact),
}

impl From<Vec<Record>> for Batch {
    fn from(records: Vec<Record>) -> Self {
        Batch::Records(records)
    }
}

impl From<Record> for Batch {
    fn from(record: Record) -> Self {
        match record {
            serde_json::Value::Array(records) => Batch::Records(records),
            serde_json::Value::Null => Batch::Records(Vec::new()),
            record => Batch::Records(vec![record]),
        }
    }
}

impl From<Artifact> for Batch {
    fn from(artifact: Artifact) -> Self {
        Batch::Artifact(artifact)
    }
}

pub enum Output {
    Empty,
    Batches(Vec<Batch>),
    Stream(BoxStream<'static, Result<Batch, Error>>),
    Producer {
        task: BoxFuture<'static, Result<(), Error>>,
        receiver: mpsc::Receiver<Batch>,
    },
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Output::Empty => write!(f, "Output::Empty"),
            Output::Batches(batches) => write!(f, "Output::Batches({})", batches.len()),
            Output::Stream(_) => write!(f, "Output::Stream"),
            Output::Producer { .. } => write!(f, "Output::Producer"),
        }
    }
}

impl Output {
    pub fn records(records: Vec<Record>) -> Self {
        Output::Batches(vec![Batch::Records(records)])
    }

    pub fn batches<B: Into<Batch>>(batches: impl IntoIterator<Item = B>) -> Self {
        Output::Batches(batches.into_iter().map(Into::into).collect())
    }

    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Batch, Error>> + Send + 'static,
    {
        Output::Stream(stream.boxed())
    }

    /// Producer pushing batches one at a time.
    ///
    /// ```ignore
    /// Output::produce(|tx| async move {
    ///     for page in 0..3 {
    ///         tx.send(fetch_page(page).await?).await?;
    ///     }
    ///     Ok(())
    /// })
    /// ```
    pub fn produce<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(BatchSender) -> Fut,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(PRODUCER_CHANNEL_CAPACITY);
        let task = producer(BatchSender(sender));
        Output::Producer {
            task: Box::pin(task),
            receiver,
        }
    }

    /// Drain the output into a list of batches.
    /// Empty batches are kept; the writer skips them.
    pub async fn collect(self) -> Result<Vec<Batch>, Error> {
        match self {
            Output::Empty => Ok(Vec::new()),
            Output::Batches(batches) => Ok(batches),
            Output::Stream(mut stream) => {
                let mut batches = Vec::new();
                while let Some(batch) = stream.next().await {
                    batches.push(batch?);
                }
                Ok(batches)
            }
            Output::Producer { task, mut receiver } => {
                let mut batches = Vec::new();
                let drain = async {
                    while let Some(batch) = receiver.recv().await {
                        batches.push(batch);
                    }
                };
                let (result, ()) = futures::join!(task, drain);
                result?;
                Ok(batches)
            }
        }
    }
}

impl From<()> for Output {
    fn from(_: ()) -> Self {
        Output::Empty
    }
}

impl From<Vec<Record>> for Output {
    fn from(records: Vec<Record>) -> Self {
        Output::records(records)
    }
}

impl From<Record> for Output {
    fn from(record: Record) -> Self {
        Output::Batches(vec![Batch::from(record)])
    }
}

impl From<Vec<Batch>> for Output {
    fn from(batches: Vec<Batch>) -> Self {
        Output::Batches(batches)
    }
}

impl From<Artifact> for Output {
    fn from(artifact: Artifact) -> Self {
        Output::Batches(vec![Batch::Artifact(artifact)])
    }
}

/// Sending half handed to a producer.
#[derive(Clone)]
pub struct BatchSender(mpsc::Sender<Batch>);

impl BatchSender {
    pub async fn send(&self, batch: impl Into<Batch>) -> Result<(), Error> {
        self.0
            .send(batch.into())
            .await
            .map_err(|_| Error::materialization_error("Batch receiver was dropped".to_owned()))
    }
}

#[async_trait]
pub trait Materializer: Send + Sync {
    async fn materialize(&self, arguments: BoundArguments) -> Result<Output, Error>;
}

#[async_trait]
impl<F, Fut> Materializer for F
where
    F: Fn(BoundArguments) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Output, Error>> + Send + 'static,
{
    async fn materialize(&self, arguments: BoundArguments) -> Result<Output, Error> {
        (self)(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record_count(batches: &[Batch]) -> usize {
        batches
            .iter()
            .map(|b| match b {
                Batch::Records(r) => r.len(),
                Batch::Artifact(_) => 0,
            })
            .sum()
    }

    #[tokio::test]
    async fn collect_producer() -> Result<(), Error> {
        let output = Output::produce(|tx| async move {
            for i in 0..40 {
                tx.send(json!({ "i": i })).await?;
            }
            Ok::<(), Error>(())
        });
        let batches = output.collect().await?;
        assert_eq!(batches.len(), 40);
        assert_eq!(record_count(&batches), 40);
        Ok(())
    }

    #[tokio::test]
    async fn producer_error_propagates() {
        let output = Output::produce(|tx| async move {
            tx.send(json!([{"a": 1}])).await?;
            Err::<(), Error>(Error::materialization_error("source unavailable".to_owned()))
        });
        let e = output.collect().await.unwrap_err();
        assert_eq!(e.message, "source unavailable");
    }

    #[tokio::test]
    async fn collect_stream() -> Result<(), Error> {
        let output = Output::stream(futures::stream::iter(vec![
            Ok(Batch::from(json!([{"a": 1}, {"a": 2}]))),
            Ok(Batch::from(json!({"a": 3}))),
        ]));
        let batches = output.collect().await?;
        assert_eq!(record_count(&batches), 3);
        Ok(())
    }

    #[tokio::test]
    async fn closure_materializer() -> Result<(), Error> {
        let m = |args: BoundArguments| async move {
            let n: i64 = args.extract("n")?;
            Ok::<Output, Error>(Output::records((0..n).map(|i| json!({ "i": i })).collect()))
        };
        let mut args = BoundArguments::new();
        args.insert("n", 3.into());
        let batches = m.materialize(args).await?.collect().await?;
        assert_eq!(record_count(&batches), 3);
        Ok(())
    }
}

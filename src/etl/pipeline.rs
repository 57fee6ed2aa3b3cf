//! Pipeline orchestration for the five-stage run

use super::handoff::keys;
use super::{Extractor, Loader, RetryPolicy, RunContext, Stage, Transformer, Validator};
use chrono::Utc;
use eyre::Result;
use std::any::Any;

/// Five-stage pipeline: Extract, Transform, Serialize, Load, Validate
///
/// Stages run strictly in order, each one fully completing before the next
/// starts. Stages never call each other: every payload goes through the
/// run's [`RunContext`]. Each stage is wrapped in the same [`RetryPolicy`].
///
/// # Type Parameters
/// - `E`: Extractor type
/// - `T`: Transformer type (must transform E::Output)
/// - `S`: Serializer, a loader that writes T::Output somewhere local
/// - `L`: Loader that ships the serializer's receipt to the destination
/// - `V`: Validator, optionally fed with the loader's receipt
///
/// # Example
/// ```no_run
/// use articles_etl::etl::{Pipeline, RetryPolicy};
/// # use articles_etl::etl::{Extractor, Loader, Transformer, Validator};
/// # use async_trait::async_trait;
/// # use eyre::Result;
/// # struct Numbers;
/// # impl Extractor for Numbers {
/// #     type Output = Vec<i32>;
/// #     async fn extract(&self) -> Result<Self::Output> { Ok(vec![1, 2]) }
/// # }
/// # struct Double;
/// # impl Transformer for Double {
/// #     type Input = Vec<i32>;
/// #     type Output = Vec<i32>;
/// #     fn transform(&self, input: Self::Input) -> Result<Self::Output> { Ok(input) }
/// # }
/// # struct Render;
/// # #[async_trait]
/// # impl Loader for Render {
/// #     type Item = Vec<i32>;
/// #     type Receipt = String;
/// #     async fn load(&self, item: &Vec<i32>) -> Result<String> { Ok(format!("{:?}", item)) }
/// # }
/// # struct Ship;
/// # #[async_trait]
/// # impl Loader for Ship {
/// #     type Item = String;
/// #     type Receipt = usize;
/// #     async fn load(&self, item: &String) -> Result<usize> { Ok(item.len()) }
/// # }
/// # struct Check;
/// # #[async_trait]
/// # impl Validator for Check {
/// #     type Evidence = usize;
/// #     type Report = ();
/// #     async fn validate(&self, _: Option<&usize>) -> Result<()> { Ok(()) }
/// # }
///
/// # async fn example() -> Result<()> {
/// let pipeline = Pipeline::new(Numbers, Double, Render, Ship, Check)
///     .with_retry(RetryPolicy::none());
/// pipeline.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Pipeline<E, T, S, L, V> {
    extractor: E,
    transformer: T,
    serializer: S,
    loader: L,
    validator: V,
    retry: RetryPolicy,
}

impl<E, T, S, L, V> Pipeline<E, T, S, L, V>
where
    E: Extractor,
    E::Output: Clone + Any + Sync,
    T: Transformer<Input = E::Output>,
    T::Output: Any + Sync,
    S: Loader<Item = T::Output>,
    S::Receipt: Any + Sync,
    L: Loader<Item = S::Receipt>,
    L::Receipt: Any + Sync,
    V: Validator<Evidence = L::Receipt>,
{
    /// Create a new pipeline with the default retry policy
    pub fn new(extractor: E, transformer: T, serializer: S, loader: L, validator: V) -> Self {
        Self {
            extractor,
            transformer,
            serializer,
            loader,
            validator,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run the complete pipeline once
    ///
    /// Steps:
    /// 1. Extract the source payload
    /// 2. Transform it
    /// 3. Serialize it to a local artifact
    /// 4. Load the artifact to the destination, then discard it
    /// 5. Validate the destination against the source
    ///
    /// Payloads still held by the run context are dropped on every exit path.
    ///
    /// # Errors
    /// Returns the error of the first stage that exhausts its attempts
    pub async fn run(&self) -> Result<V::Report> {
        let mut ctx = RunContext::new();
        log::info!("Starting pipeline run {}", ctx.run_id());

        // Extract
        log::debug!("Extracting from source...");
        let extracted = self
            .retry
            .run(Stage::Extract, || self.extractor.extract())
            .await?;
        ctx.publish(Stage::Extract, keys::DATAFRAME, extracted)?;

        // Transform
        log::debug!("Transforming...");
        let transformed = {
            let ctx = &ctx;
            self.retry
                .run(Stage::Transform, move || async move {
                    let input = ctx
                        .get::<E::Output>(Stage::Extract, keys::DATAFRAME)?
                        .clone();
                    self.transformer.transform(input)
                })
                .await?
        };
        ctx.publish(Stage::Transform, keys::TRANSFORMED_DATAFRAME, transformed)?;

        // Serialize
        log::debug!("Serializing...");
        let staged = {
            let ctx = &ctx;
            self.retry
                .run(Stage::Serialize, move || async move {
                    let input =
                        ctx.get::<T::Output>(Stage::Transform, keys::TRANSFORMED_DATAFRAME)?;
                    self.serializer.load(input).await
                })
                .await?
        };
        ctx.publish(Stage::Serialize, keys::CSV_FILENAME, staged)?;

        // Load
        log::debug!("Loading to destination...");
        let report = {
            let ctx = &ctx;
            self.retry
                .run(Stage::Load, move || async move {
                    let input = ctx.get::<S::Receipt>(Stage::Serialize, keys::CSV_FILENAME)?;
                    self.loader.load(input).await
                })
                .await?
        };
        ctx.discard(Stage::Serialize, keys::CSV_FILENAME);
        ctx.publish(Stage::Load, keys::LOAD_REPORT, report)?;

        // Validate
        log::debug!("Validating...");
        let validation = {
            let ctx = &ctx;
            self.retry
                .run(Stage::Validate, move || async move {
                    let evidence = ctx.get::<L::Receipt>(Stage::Load, keys::LOAD_REPORT).ok();
                    self.validator.validate(evidence).await
                })
                .await?
        };

        log::info!(
            "Pipeline run {} succeeded in {}s",
            ctx.run_id(),
            (Utc::now() - ctx.started_at()).num_seconds()
        );
        Ok(validation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use eyre::Result;
    use std::sync::{Arc, Mutex};

    struct MockExtractor(Vec<i32>);

    impl Extractor for MockExtractor {
        type Output = Vec<i32>;
        async fn extract(&self) -> Result<Self::Output> {
            Ok(self.0.clone())
        }
    }

    struct DoubleTransformer;

    impl Transformer for DoubleTransformer {
        type Input = Vec<i32>;
        type Output = Vec<i32>;
        fn transform(&self, input: Self::Input) -> Result<Self::Output> {
            Ok(input.into_iter().map(|i| i * 2).collect())
        }
    }

    /// Tracks how many receipts are alive, mimicking a scoped temp file
    struct Receipt {
        text: String,
        alive: Arc<Mutex<usize>>,
    }

    impl Drop for Receipt {
        fn drop(&mut self) {
            *self.alive.lock().unwrap() -= 1;
        }
    }

    struct JoinSerializer {
        alive: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl Loader for JoinSerializer {
        type Item = Vec<i32>;
        type Receipt = Receipt;
        async fn load(&self, item: &Vec<i32>) -> Result<Receipt> {
            *self.alive.lock().unwrap() += 1;
            let text = item
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(",");
            Ok(Receipt {
                text,
                alive: self.alive.clone(),
            })
        }
    }

    struct SumLoader {
        sum: Arc<Mutex<i32>>,
        fail: bool,
    }

    #[async_trait]
    impl Loader for SumLoader {
        type Item = Receipt;
        type Receipt = usize;
        async fn load(&self, item: &Receipt) -> Result<usize> {
            if self.fail {
                eyre::bail!("destination unreachable");
            }
            let values: Vec<i32> = item
                .text
                .split(',')
                .map(|s| s.parse())
                .collect::<Result<_, _>>()?;
            *self.sum.lock().unwrap() = values.iter().sum();
            Ok(values.len())
        }
    }

    struct ExpectCount(usize);

    #[async_trait]
    impl Validator for ExpectCount {
        type Evidence = usize;
        type Report = usize;
        async fn validate(&self, evidence: Option<&usize>) -> Result<usize> {
            match evidence {
                Some(n) if *n == self.0 => Ok(*n),
                other => eyre::bail!("expected {}, loaded {:?}", self.0, other),
            }
        }
    }

    fn pipeline(
        values: Vec<i32>,
        expected: usize,
        fail: bool,
    ) -> (
        Pipeline<MockExtractor, DoubleTransformer, JoinSerializer, SumLoader, ExpectCount>,
        Arc<Mutex<i32>>,
        Arc<Mutex<usize>>,
    ) {
        let sum = Arc::new(Mutex::new(0));
        let alive = Arc::new(Mutex::new(0));
        let pipeline = Pipeline::new(
            MockExtractor(values),
            DoubleTransformer,
            JoinSerializer {
                alive: alive.clone(),
            },
            SumLoader {
                sum: sum.clone(),
                fail,
            },
            ExpectCount(expected),
        )
        .with_retry(RetryPolicy::none());
        (pipeline, sum, alive)
    }

    #[tokio::test]
    async fn test_pipeline() {
        let (pipeline, sum, alive) = pipeline(vec![1, 2, 3], 3, false);

        let count = pipeline.run().await.unwrap();
        assert_eq!(count, 3);
        assert_eq!(*sum.lock().unwrap(), 12); // (1+2+3)*2 = 12
        assert_eq!(*alive.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_validation_failure_fails_run() {
        let (pipeline, _, _) = pipeline(vec![1, 2, 3], 4, false);

        let err = pipeline.run().await.unwrap_err();
        assert!(err.to_string().contains("validate_data failed"));
    }

    #[tokio::test]
    async fn test_failed_load_drops_staged_receipt() {
        let (pipeline, sum, alive) = pipeline(vec![1, 2, 3], 3, true);

        let err = pipeline.run().await.unwrap_err();
        assert!(err.to_string().contains("upload_to_snowflake failed"));
        assert_eq!(*sum.lock().unwrap(), 0);
        assert_eq!(*alive.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_retries_use_policy() {
        let (pipeline, _, _) = pipeline(vec![1], 1, true);
        let pipeline = pipeline.with_retry(RetryPolicy::default());
        let start = tokio::time::Instant::now();

        assert!(pipeline.run().await.is_err());
        assert_eq!(
            start.elapsed(),
            std::time::Duration::from_secs(3 * 5 * 60)
        );
    }
}

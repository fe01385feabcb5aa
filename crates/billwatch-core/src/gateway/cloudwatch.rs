//! CloudWatch-backed metrics gateway

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_cloudwatch::config::{ProvideCredentials, Region};
use aws_sdk_cloudwatch::error::DisplayErrorContext;
use aws_sdk_cloudwatch::primitives::DateTime as AwsDateTime;
use aws_sdk_cloudwatch::types::{Dimension, Metric, Statistic};
use aws_sdk_cloudwatch::Client;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::MetricsConfig;
use crate::error::{Error, Result};
use crate::models::{Datapoint, MetricDescriptor, MetricScope, MetricStatistics, ServiceId};

use super::{services_from_metrics, MetricsGateway};

/// Reads estimated charges from CloudWatch
#[derive(Debug, Clone)]
pub struct CloudWatchGateway {
    client: Client,
    config: MetricsConfig,
}

impl CloudWatchGateway {
    /// Resolve credentials from the environment and create a client
    pub async fn connect(config: MetricsConfig) -> Result<Self> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        Self::from_sdk_config(&sdk_config, config).await
    }

    /// Create a client from loaded SDK settings.
    ///
    /// Credentials are resolved once up front, under the call timeout, so a
    /// missing or broken credential chain fails here instead of on the first
    /// metrics call.
    pub async fn from_sdk_config(sdk_config: &SdkConfig, config: MetricsConfig) -> Result<Self> {
        let provider = sdk_config
            .credentials_provider()
            .ok_or_else(|| Error::session("no AWS credentials provider configured"))?;

        match tokio::time::timeout(config.call_timeout, provider.provide_credentials()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(Error::session(format!(
                    "failed to resolve AWS credentials: {}",
                    DisplayErrorContext(&e)
                )))
            }
            Err(_) => {
                return Err(Error::session(format!(
                    "resolving AWS credentials timed out after {}",
                    humantime::format_duration(config.call_timeout)
                )))
            }
        }

        info!(region = %config.region, "CloudWatch session established");
        Ok(Self::from_client(Client::new(sdk_config), config))
    }

    /// Wrap an existing client
    pub fn from_client(client: Client, config: MetricsConfig) -> Self {
        Self { client, config }
    }

    /// Run one backend call under the configured timeout
    async fn call<T, E, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: std::error::Error,
    {
        match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(Error::backend(format!(
                "{operation} failed: {}",
                DisplayErrorContext(&e)
            ))),
            Err(_) => Err(Error::backend(format!(
                "{operation} timed out after {}",
                humantime::format_duration(self.config.call_timeout)
            ))),
        }
    }

    /// Query window ending now
    fn window(&self) -> Result<(AwsDateTime, AwsDateTime)> {
        query_window(Utc::now(), self.config.lookback)
    }
}

#[async_trait]
impl MetricsGateway for CloudWatchGateway {
    async fn list_services(&self) -> Result<Vec<ServiceId>> {
        let mut descriptors = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .call(
                    "ListMetrics",
                    self.client
                        .list_metrics()
                        .namespace(&self.config.namespace)
                        .metric_name(&self.config.metric_name)
                        .set_next_token(next_token.take())
                        .send(),
                )
                .await?;

            descriptors.extend(page.metrics().iter().map(to_descriptor));

            match page.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        let services = services_from_metrics(&descriptors, &self.config.service_dimension);
        debug!(
            listed = descriptors.len(),
            services = services.len(),
            "Discovered billed services"
        );
        Ok(services)
    }

    async fn fetch_statistics(&self, scope: &MetricScope) -> Result<MetricStatistics> {
        let (start, end) = self.window()?;

        let mut request = self
            .client
            .get_metric_statistics()
            .namespace(&self.config.namespace)
            .metric_name(&self.config.metric_name)
            .period(self.config.period_secs)
            .start_time(start)
            .end_time(end)
            .statistics(Statistic::Maximum)
            .dimensions(dimension(&self.config.currency_dimension, &self.config.currency));

        if let MetricScope::ByService(id) = scope {
            request = request.dimensions(dimension(&self.config.service_dimension, id.as_str()));
        }

        let output = self.call(&operation_name(scope), request.send()).await?;

        let datapoints = output
            .datapoints()
            .iter()
            .map(|point| Datapoint {
                maximum: point.maximum().unwrap_or_default(),
                unit: point
                    .unit()
                    .map(|unit| unit.as_str().to_string())
                    .unwrap_or_default(),
                timestamp: point.timestamp().and_then(from_aws_time),
            })
            .collect::<Vec<_>>();

        debug!(scope = ?scope, datapoints = datapoints.len(), "Fetched billing statistics");

        Ok(MetricStatistics {
            label: output.label().unwrap_or_default().to_string(),
            datapoints,
        })
    }
}

fn operation_name(scope: &MetricScope) -> String {
    match scope {
        MetricScope::ByService(id) => format!("GetMetricStatistics[{id}]"),
        MetricScope::Aggregate => "GetMetricStatistics[total]".to_string(),
    }
}

fn dimension(name: &str, value: &str) -> Dimension {
    Dimension::builder().name(name).value(value).build()
}

fn to_descriptor(metric: &Metric) -> MetricDescriptor {
    MetricDescriptor {
        dimensions: metric
            .dimensions()
            .iter()
            .map(|d| {
                (
                    d.name().unwrap_or_default().to_string(),
                    d.value().unwrap_or_default().to_string(),
                )
            })
            .collect(),
    }
}

/// `(end - lookback, end)`; a lookback reaching outside the calendar is a
/// configuration error
fn query_window(end: DateTime<Utc>, lookback: Duration) -> Result<(AwsDateTime, AwsDateTime)> {
    let start = chrono::Duration::from_std(lookback)
        .ok()
        .and_then(|lookback| end.checked_sub_signed(lookback))
        .ok_or_else(|| {
            Error::config(format!(
                "metrics.lookback of {} reaches past the earliest representable time",
                humantime::format_duration(lookback)
            ))
        })?;
    Ok((to_aws_time(start), to_aws_time(end)))
}

fn to_aws_time(time: DateTime<Utc>) -> AwsDateTime {
    AwsDateTime::from_secs(time.timestamp())
}

fn from_aws_time(time: &AwsDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(time.secs(), time.subsec_nanos())
}

impl Display for CloudWatchGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cloudwatch({}, {}/{})",
            self.config.region, self.config.namespace, self.config.metric_name
        )
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use aws_credential_types::provider::error::CredentialsError;
    use aws_credential_types::provider::future;
    use aws_sdk_cloudwatch::config::retry::RetryConfig;
    use aws_sdk_cloudwatch::config::{Credentials, SharedCredentialsProvider};
    use aws_smithy_cbor::data::Type;
    use aws_smithy_cbor::{Decoder, Encoder};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

    const LIST_METRICS: &str = "/service/GraniteServiceVersion20100801/operation/ListMetrics";
    const GET_STATISTICS: &str =
        "/service/GraniteServiceVersion20100801/operation/GetMetricStatistics";

    /// Decoded CBOR body, enough of it to inspect what the client sent
    #[derive(Debug, Clone, PartialEq)]
    enum Cbor {
        Text(String),
        Int(i64),
        Time(i64),
        List(Vec<Cbor>),
        Map(Vec<(String, Cbor)>),
        Other,
    }

    impl Cbor {
        fn parse(bytes: &[u8]) -> Self {
            read(&mut Decoder::new(bytes))
        }

        fn get(&self, key: &str) -> Option<&Cbor> {
            match self {
                Cbor::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
                _ => None,
            }
        }

        fn text(&self) -> Option<&str> {
            match self {
                Cbor::Text(text) => Some(text),
                _ => None,
            }
        }
    }

    fn read(decoder: &mut Decoder) -> Cbor {
        match decoder.datatype().unwrap() {
            Type::Map | Type::MapIndef => {
                let len = decoder.map().unwrap();
                let mut entries = Vec::new();
                while !at_end(decoder, len, entries.len()) {
                    let key = decoder.string().unwrap();
                    entries.push((key, read(decoder)));
                }
                Cbor::Map(entries)
            }
            Type::Array | Type::ArrayIndef => {
                let len = decoder.list().unwrap();
                let mut items = Vec::new();
                while !at_end(decoder, len, items.len()) {
                    items.push(read(decoder));
                }
                Cbor::List(items)
            }
            Type::String | Type::StringIndef => Cbor::Text(decoder.string().unwrap()),
            Type::U8
            | Type::U16
            | Type::U32
            | Type::U64
            | Type::I8
            | Type::I16
            | Type::I32
            | Type::I64
            | Type::Int => Cbor::Int(decoder.long().unwrap()),
            Type::Tag => Cbor::Time(decoder.timestamp().unwrap().secs()),
            _ => {
                decoder.skip().unwrap();
                Cbor::Other
            }
        }
    }

    fn at_end(decoder: &mut Decoder, len: Option<u64>, seen: usize) -> bool {
        match len {
            Some(n) => seen as u64 == n,
            None if decoder.datatype().unwrap() == Type::Break => {
                decoder.skip().unwrap();
                true
            }
            None => false,
        }
    }

    fn dimensions_of(body: &Cbor) -> Vec<(String, String)> {
        match body.get("Dimensions") {
            Some(Cbor::List(items)) => items
                .iter()
                .map(|item| {
                    (
                        item.get("Name").and_then(Cbor::text).unwrap().to_string(),
                        item.get("Value").and_then(Cbor::text).unwrap().to_string(),
                    )
                })
                .collect(),
            _ => vec![],
        }
    }

    /// Matches a ListMetrics request by the page token it carries
    struct NextToken(Option<&'static str>);

    impl Match for NextToken {
        fn matches(&self, request: &Request) -> bool {
            let body = Cbor::parse(&request.body);
            body.get("NextToken").and_then(Cbor::text) == self.0
        }
    }

    fn metrics_page(metrics: &[&[(&str, &str)]], next_token: Option<&str>) -> Vec<u8> {
        let mut encoder = Encoder::new(Vec::new());
        encoder.map(if next_token.is_some() { 2 } else { 1 });
        encoder.str("Metrics").array(metrics.len());
        for dimensions in metrics {
            encoder
                .map(3)
                .str("Namespace")
                .str("AWS/Billing")
                .str("MetricName")
                .str("EstimatedCharges")
                .str("Dimensions")
                .array(dimensions.len());
            for (name, value) in *dimensions {
                encoder.map(2).str("Name").str(name).str("Value").str(value);
            }
        }
        if let Some(token) = next_token {
            encoder.str("NextToken").str(token);
        }
        encoder.into_writer()
    }

    fn statistics_reply(label: &str, points: &[(i64, f64)]) -> Vec<u8> {
        let mut encoder = Encoder::new(Vec::new());
        encoder
            .map(2)
            .str("Label")
            .str(label)
            .str("Datapoints")
            .array(points.len());
        for (secs, maximum) in points {
            encoder
                .map(3)
                .str("Timestamp")
                .timestamp(&AwsDateTime::from_secs(*secs))
                .str("Maximum")
                .double(*maximum)
                .str("Unit")
                .str("None");
        }
        encoder.into_writer()
    }

    fn cbor_response(body: Vec<u8>) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("smithy-protocol", "rpc-v2-cbor")
            .set_body_raw(body, "application/cbor")
    }

    fn static_credentials() -> Credentials {
        Credentials::new("AKIDBILLWATCH", "billwatch-secret", None, None, "static")
    }

    fn gateway_for(server: &MockServer, config: MetricsConfig) -> CloudWatchGateway {
        let sdk_config = aws_sdk_cloudwatch::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(static_credentials())
            .endpoint_url(server.uri())
            .retry_config(RetryConfig::disabled())
            .build();
        CloudWatchGateway::from_client(Client::from_conf(sdk_config), config)
    }

    async fn requests_to(server: &MockServer, operation: &str) -> Vec<Cbor> {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|request| request.url.path() == operation)
            .map(|request| Cbor::parse(&request.body))
            .collect()
    }

    #[tokio::test]
    async fn test_list_services_follows_next_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LIST_METRICS))
            .and(NextToken(None))
            .respond_with(cbor_response(metrics_page(
                &[
                    &[("ServiceName", "AmazonEC2"), ("Currency", "USD")],
                    &[("Currency", "USD")],
                ],
                Some("page-2"),
            )))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(LIST_METRICS))
            .and(NextToken(Some("page-2")))
            .respond_with(cbor_response(metrics_page(
                &[
                    &[("ServiceName", "AWSLambda"), ("Currency", "USD")],
                    &[("ServiceName", "Total"), ("Currency", "USD")],
                    &[("ServiceName", "AmazonEC2"), ("Currency", "USD")],
                ],
                None,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let services = gateway_for(&server, MetricsConfig::default())
            .list_services()
            .await
            .unwrap();

        assert_eq!(
            services,
            vec![ServiceId::new("AmazonEC2"), ServiceId::new("AWSLambda")]
        );
        for request in requests_to(&server, LIST_METRICS).await {
            assert_eq!(request.get("Namespace").and_then(Cbor::text), Some("AWS/Billing"));
            assert_eq!(
                request.get("MetricName").and_then(Cbor::text),
                Some("EstimatedCharges")
            );
        }
    }

    #[tokio::test]
    async fn test_service_statistics_request_and_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GET_STATISTICS))
            .respond_with(cbor_response(statistics_reply(
                "EstimatedCharges",
                &[(1_638_057_420, 11.0), (1_638_143_820, 12.345)],
            )))
            .expect(1)
            .mount(&server)
            .await;

        let stats = gateway_for(&server, MetricsConfig::default())
            .fetch_statistics(&MetricScope::ByService("AmazonEC2".into()))
            .await
            .unwrap();

        assert_eq!(stats.label, "EstimatedCharges");
        assert_eq!(stats.datapoints.len(), 2);
        let latest = stats.latest().unwrap();
        assert_eq!(latest.maximum, 12.345);
        assert_eq!(latest.unit, "None");
        assert_eq!(
            latest.timestamp,
            Some(Utc.with_ymd_and_hms(2021, 11, 28, 23, 57, 0).unwrap())
        );

        let sent = requests_to(&server, GET_STATISTICS).await;
        assert_eq!(sent.len(), 1);
        let request = &sent[0];
        assert_eq!(request.get("Namespace").and_then(Cbor::text), Some("AWS/Billing"));
        assert_eq!(
            request.get("MetricName").and_then(Cbor::text),
            Some("EstimatedCharges")
        );
        assert_eq!(request.get("Period"), Some(&Cbor::Int(86_400)));
        assert_eq!(
            request.get("Statistics"),
            Some(&Cbor::List(vec![Cbor::Text("Maximum".to_string())]))
        );
        assert_eq!(
            dimensions_of(request),
            vec![
                ("Currency".to_string(), "USD".to_string()),
                ("ServiceName".to_string(), "AmazonEC2".to_string()),
            ]
        );
        match (request.get("StartTime"), request.get("EndTime")) {
            (Some(Cbor::Time(start)), Some(Cbor::Time(end))) => assert_eq!(end - start, 86_400),
            other => panic!("unexpected window: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_aggregate_filters_by_currency_only() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GET_STATISTICS))
            .respond_with(cbor_response(statistics_reply(
                "EstimatedCharges",
                &[(1_638_143_820, 15.5)],
            )))
            .expect(1)
            .mount(&server)
            .await;

        let aggregate = gateway_for(&server, MetricsConfig::default())
            .fetch_aggregate_cost()
            .await
            .unwrap();

        assert_eq!(aggregate.amount, 15.5);
        let sent = requests_to(&server, GET_STATISTICS).await;
        assert_eq!(
            dimensions_of(&sent[0]),
            vec![("Currency".to_string(), "USD".to_string())]
        );
    }

    #[tokio::test]
    async fn test_rejected_call_is_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LIST_METRICS))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let result = gateway_for(&server, MetricsConfig::default())
            .list_services()
            .await;

        assert!(matches!(result, Err(Error::Backend(_))));
    }

    #[tokio::test]
    async fn test_slow_call_times_out_as_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GET_STATISTICS))
            .respond_with(
                cbor_response(statistics_reply("EstimatedCharges", &[]))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;
        let config = MetricsConfig {
            call_timeout: Duration::from_millis(100),
            ..MetricsConfig::default()
        };

        let result = gateway_for(&server, config)
            .fetch_statistics(&MetricScope::Aggregate)
            .await;

        match result {
            Err(Error::Backend(msg)) => assert!(msg.contains("timed out")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[derive(Debug)]
    struct Unresolvable;

    impl ProvideCredentials for Unresolvable {
        fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
        where
            Self: 'a,
        {
            future::ProvideCredentials::ready(Err(CredentialsError::not_loaded(
                "no credentials in the environment",
            )))
        }
    }

    #[derive(Debug)]
    struct Hanging;

    impl ProvideCredentials for Hanging {
        fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
        where
            Self: 'a,
        {
            future::ProvideCredentials::new(std::future::pending())
        }
    }

    fn sdk_config(provider: Option<SharedCredentialsProvider>) -> SdkConfig {
        let mut builder = SdkConfig::builder()
            .region(Region::new("us-east-1"))
            .behavior_version(BehaviorVersion::latest());
        if let Some(provider) = provider {
            builder = builder.credentials_provider(provider);
        }
        builder.build()
    }

    #[tokio::test]
    async fn test_session_requires_credentials_provider() {
        let config = sdk_config(None);

        let result = CloudWatchGateway::from_sdk_config(&config, MetricsConfig::default()).await;

        assert!(matches!(result, Err(Error::Session(_))));
    }

    #[tokio::test]
    async fn test_unresolvable_credentials_are_session_error() {
        let config = sdk_config(Some(SharedCredentialsProvider::new(Unresolvable)));

        let result = CloudWatchGateway::from_sdk_config(&config, MetricsConfig::default()).await;

        match result {
            Err(Error::Session(msg)) => assert!(msg.contains("failed to resolve AWS credentials")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_hanging_credentials_time_out_as_session_error() {
        let config = sdk_config(Some(SharedCredentialsProvider::new(Hanging)));
        let metrics = MetricsConfig {
            call_timeout: Duration::from_millis(50),
            ..MetricsConfig::default()
        };

        let result = CloudWatchGateway::from_sdk_config(&config, metrics).await;

        assert!(matches!(result, Err(Error::Session(_))));
    }

    #[tokio::test]
    async fn test_static_credentials_establish_session() {
        let config = sdk_config(Some(SharedCredentialsProvider::new(static_credentials())));

        let gateway = CloudWatchGateway::from_sdk_config(&config, MetricsConfig::default())
            .await
            .unwrap();

        assert_eq!(
            gateway.to_string(),
            "cloudwatch(us-east-1, AWS/Billing/EstimatedCharges)"
        );
    }

    #[test]
    fn test_window_spans_lookback() {
        let end = Utc.with_ymd_and_hms(2021, 11, 29, 0, 0, 0).unwrap();

        let (start, stop) = query_window(end, Duration::from_secs(86_400)).unwrap();

        assert_eq!(stop.secs(), end.timestamp());
        assert_eq!(stop.secs() - start.secs(), 86_400);
    }

    #[test]
    fn test_oversized_lookback_is_config_error() {
        let end = Utc.with_ymd_and_hms(2021, 11, 29, 0, 0, 0).unwrap();
        let million_years = Duration::from_secs(1_000_000 * 365 * 86_400);

        assert!(matches!(
            query_window(end, million_years),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            query_window(end, Duration::MAX),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_time_conversion_keeps_seconds() {
        let time = Utc.with_ymd_and_hms(2021, 11, 28, 23, 57, 0).unwrap();

        assert_eq!(from_aws_time(&to_aws_time(time)), Some(time));
    }

    #[test]
    fn test_operation_name_names_scope() {
        assert_eq!(
            operation_name(&MetricScope::ByService("AmazonEC2".into())),
            "GetMetricStatistics[AmazonEC2]"
        );
        assert_eq!(
            operation_name(&MetricScope::Aggregate),
            "GetMetricStatistics[total]"
        );
    }
}

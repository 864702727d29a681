use async_trait::async_trait;
use serde_json::Value;
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use super::{BackendConnection, Connector, Row, convert};
use crate::config::DatabaseConfig;
use crate::errors::BackendError;

const APPLICATION_NAME: &str = "sqlgate";

// -----------------------------------------------------------------------------
// ----- SqlServerConnector ----------------------------------------------------

/// Opens TDS sessions against one SQL Server database with SQL authentication.
#[derive(Clone, Debug)]
pub struct SqlServerConnector {
    config: Config,
    target: String,
}

// -----------------------------------------------------------------------------
// ----- SqlServerConnector: Static --------------------------------------------

impl SqlServerConnector {
    pub fn new(database: &DatabaseConfig) -> Self {
        let mut config = Config::new();
        config.host(&database.host);
        config.port(database.port);
        config.database(&database.database);
        config.application_name(APPLICATION_NAME);
        config.authentication(AuthMethod::sql_server(
            &database.user,
            database.password_exposed(),
        ));

        if database.trust_cert {
            config.trust_cert();
        }

        Self {
            config,
            target: format!(
                "mssql://{}@{}:{}/{}",
                database.user, database.host, database.port, database.database
            ),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- SqlServerConnector: Private -------------------------------------------

impl SqlServerConnector {
    async fn open(config: Config) -> Result<Client<Compat<TcpStream>>, tiberius::error::Error> {
        let tcp = TcpStream::connect(config.get_addr()).await?;
        tcp.set_nodelay(true).ok();
        Client::connect(config, tcp.compat_write()).await
    }
}

#[async_trait]
impl Connector for SqlServerConnector {
    async fn connect(&self) -> Result<Box<dyn BackendConnection>, BackendError> {
        let client = match Self::open(self.config.clone()).await {
            Ok(client) => client,

            // Azure SQL gateways answer the first login with a redirect.
            Err(tiberius::error::Error::Routing { host, port }) => {
                debug!("backend redirected login to {host}:{port}");
                let mut redirected = self.config.clone();
                redirected.host(&host);
                redirected.port(port);
                Self::open(redirected).await.map_err(connect_error)?
            }

            Err(e) => return Err(connect_error(e)),
        };

        Ok(Box::new(SqlServerConnection { client }))
    }

    fn describe(&self) -> String {
        self.target.clone()
    }
}

// -----------------------------------------------------------------------------
// ----- SqlServerConnection ---------------------------------------------------

struct SqlServerConnection {
    client: Client<Compat<TcpStream>>,
}

#[async_trait]
impl BackendConnection for SqlServerConnection {
    async fn ping(&mut self) -> Result<(), BackendError> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map_err(query_error)?
            .into_results()
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, BackendError> {
        let bound = convert::params(params);
        let refs = convert::param_refs(&bound);

        let rows = self
            .client
            .query(sql, &refs)
            .await
            .map_err(query_error)?
            .into_first_result()
            .await
            .map_err(query_error)?;

        Ok(rows.iter().map(convert::row_to_json).collect())
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, BackendError> {
        let bound = convert::params(params);
        let refs = convert::param_refs(&bound);

        let result = self.client.execute(sql, &refs).await.map_err(query_error)?;
        Ok(result.total())
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn connect_error(e: tiberius::error::Error) -> BackendError {
    BackendError::Connect(e.to_string())
}

/// Server-side errors carry the message the database produced; keep it as-is.
fn query_error(e: tiberius::error::Error) -> BackendError {
    match e {
        tiberius::error::Error::Server(token) => BackendError::Query(token.message().to_string()),
        other => BackendError::Query(other.to_string()),
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------

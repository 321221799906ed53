use anyhow::{bail, Context};
use reqwest::header::LOCATION;
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::RetryTransientMiddleware;
use reqwest_tracing::TracingMiddleware;

use crate::api::{
    Book, BookId, NewBook, Recommendations, ReservationRecord, UserId, USER_ID_HEADER,
};

const MAX_RETRIES: u32 = 3;

pub struct LibraryServiceClient {
    url: String,
    client: ClientWithMiddleware,
    post_client: ClientWithMiddleware,
}

impl LibraryServiceClient {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        // Redirects are not followed, the reservation outcome travels in the Location header
        let reqwest_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to build reqwest client")?;
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);
        let client = ClientBuilder::new(reqwest_client.clone())
            // Insert the tracing middleware
            .with(TracingMiddleware::default())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        // POSTs are not retried, a repeated reservation whose first response was lost
        // would be reported as already reserved and a repeated add would add the book twice
        let post_client = ClientBuilder::new(reqwest_client)
            .with(TracingMiddleware::default())
            .build();

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client,
            post_client,
        })
    }

    /// Calls POST /api/book endpoint
    /// Returns book_id of added book
    pub async fn add_book(&self, book: NewBook) -> anyhow::Result<BookId> {
        let response = self
            .post_client
            .post(format!("{}/api/book", self.url))
            .json(&book)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("Failed to add book, status {}", response.status())
        }

        response
            .headers()
            .get(LOCATION)
            .context("No location header")?
            .to_str()
            .context("Failed to convert header to str")?
            .strip_prefix("/api/book/")
            .context("Invalid location header")?
            .parse()
            .context("Failed to parse book id")
    }

    /// Calls GET /api/book/{book_id} endpoint
    /// Returns None if the book is not in the library
    pub async fn get_book(&self, book_id: BookId) -> anyhow::Result<Option<Book>> {
        let response = self
            .client
            .get(format!("{}/api/book/{}", self.url, book_id))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            Ok(None)
        } else if response.status().is_success() {
            Ok(Some(response.json().await?))
        } else {
            bail!("Failed to get book, status {}", response.status())
        }
    }

    /// Calls GET /api/user/{user_id}/recommendations endpoint
    pub async fn get_recommendations(&self, user_id: UserId) -> anyhow::Result<Recommendations> {
        let response = self
            .client
            .get(format!("{}/api/user/{}/recommendations", self.url, user_id))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            bail!("Failed to get recommendations, status {}", response.status())
        }
    }

    /// Calls GET /api/user/{user_id}/reservations endpoint
    pub async fn list_reservations(
        &self,
        user_id: UserId,
    ) -> anyhow::Result<Vec<ReservationRecord>> {
        let response = self
            .client
            .get(format!("{}/api/user/{}/reservations", self.url, user_id))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            bail!("Failed to list reservations, status {}", response.status())
        }
    }

    /// Submits the reserve form of the page as the given user
    /// Returns the message the page would show after the redirect
    pub async fn reserve_book(&self, user_id: UserId, book_id: BookId) -> anyhow::Result<String> {
        let response = self
            .post_client
            .post(format!("{}/", self.url))
            .header(USER_ID_HEADER, user_id.to_string())
            .form(&[("book_id", book_id.to_string())])
            .send()
            .await?;

        if response.status() != StatusCode::SEE_OTHER {
            bail!("Expected redirect, got status {}", response.status())
        }

        let location = response
            .headers()
            .get(LOCATION)
            .context("No location header")?
            .to_str()
            .context("Failed to convert header to str")?;

        let redirect_url = reqwest::Url::parse(&self.url)
            .context("Invalid service url")?
            .join(location)
            .context("Invalid location header")?;

        redirect_url
            .query_pairs()
            .find(|(key, _)| key == "message")
            .map(|(_, message)| message.into_owned())
            .context("No message in redirect")
    }

    /// Calls GET / as the given user and returns the rendered page
    pub async fn get_page(&self, user_id: UserId) -> anyhow::Result<String> {
        let response = self
            .client
            .get(format!("{}/", self.url))
            .header(USER_ID_HEADER, user_id.to_string())
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response.text().await?)
        } else {
            bail!("Failed to get page, status {}", response.status())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Server that reads each request and hangs up without answering
    fn start_hanging_up_server() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();
        std::thread::spawn(move || {
            for mut stream in listener.incoming().flatten() {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
            }
        });
        (url, connections)
    }

    #[tokio::test]
    async fn test_reservation_is_sent_once_when_response_is_lost() {
        let (url, connections) = start_hanging_up_server();
        let client = LibraryServiceClient::new(&url).unwrap();

        assert!(client.reserve_book(1, 42).await.is_err());
        assert_eq!(connections.load(Ordering::SeqCst), 1);
    }
}
